use rusqlite::Connection;

use crate::error::Result;

/// Initialise the store schema in `conn`. Idempotent.
///
/// Runs under the write lock so workers booting together on one database
/// file wait for each other instead of failing.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN IMMEDIATE;

        CREATE TABLE IF NOT EXISTS schedules (
            id                  TEXT    NOT NULL PRIMARY KEY,
            job_id              TEXT    NOT NULL,
            frequency           TEXT    NOT NULL,
            target_time_of_day  TEXT    NOT NULL,   -- [0.]hh:mm[:ss] since midnight
            active              INTEGER NOT NULL DEFAULT 1,
            created_at          TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS schedule_instances (
            instance_id   INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id   TEXT    NOT NULL,   -- job id for ad hoc instances
            job_id        TEXT    NOT NULL,
            target_time   TEXT    NOT NULL,   -- fixed-width RFC 3339 UTC
            status        TEXT    NOT NULL DEFAULT 'queued',
            locked_by     TEXT,
            locked_at     TEXT,
            completed_at  TEXT
        ) STRICT;

        -- Claim query: WHERE status = 'queued' AND target_time <= ? ORDER BY target_time
        CREATE INDEX IF NOT EXISTS idx_instances_due
            ON schedule_instances (status, target_time);

        CREATE TABLE IF NOT EXISTS task_queue (
            seq           INTEGER PRIMARY KEY AUTOINCREMENT,
            queue_id      TEXT    NOT NULL,
            task_id       TEXT    NOT NULL,
            status        TEXT    NOT NULL DEFAULT 'queued',
            outcome       TEXT,
            locked_by     TEXT,
            locked_at     TEXT,
            enqueued_at   TEXT    NOT NULL,
            completed_at  TEXT,
            UNIQUE (queue_id, task_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_queue_open
            ON task_queue (queue_id, status, enqueued_at);

        COMMIT;
        ",
    )?;
    Ok(())
}
