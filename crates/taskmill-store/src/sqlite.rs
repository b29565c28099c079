use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use taskmill_core::{
    AlertSink, Frequency, InstanceStatus, NewInstance, QueuedTask, Schedule, ScheduleInstance,
    TaskOutcome, TaskStatus, TracingSink,
};
use tracing::{debug, error, instrument};

use crate::{
    contract::{InstanceStore, TaskStore},
    db::init_db,
    error::{Result, StoreError},
};

/// SQLite-backed store.
///
/// One connection per `SqliteStore`, guarded by a `Mutex`. Workers that must
/// not share memory open their own store on the same database file; mutual
/// exclusion then comes only from SQLite's write lock. Every write runs in
/// a `BEGIN IMMEDIATE` transaction so lock waits go through the busy timeout
/// instead of failing on a stale read snapshot.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    alerts: Arc<dyn AlertSink>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            alerts: Arc::new(TracingSink),
        })
    }

    /// Report undecodable rows to `alerts` instead of plain tracing.
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Open (or create) a database file in WAL mode.
    ///
    /// `busy_timeout` bounds how long a call waits for another writer;
    /// exceeding it surfaces as `StoreError::Database`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Fixed-width RFC 3339 so that string order equals time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Like [`format_timestamp`], but only for years 0000..=9999, where the
/// text stays fixed-width.
pub fn checked_timestamp(dt: DateTime<Utc>) -> Result<String> {
    if !(0..=9999).contains(&dt.year()) {
        return Err(StoreError::TargetTimeOutOfRange(dt));
    }
    Ok(format_timestamp(dt))
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

// Columns: instance_id, schedule_id, job_id, target_time, status, locked_by
type InstanceRow = (i64, String, String, String, String, Option<String>);

const INSTANCE_COLUMNS: &str = "instance_id, schedule_id, job_id, target_time, status, locked_by";

fn read_instance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_instance(raw: InstanceRow) -> Result<ScheduleInstance> {
    let (instance_id, schedule_id, job_id, target_time, status, locked_by) = raw;
    Ok(ScheduleInstance {
        instance_id,
        schedule_id,
        job_id,
        target_time: parse_timestamp(&target_time)?,
        status: status
            .parse::<InstanceStatus>()
            .map_err(StoreError::Corrupt)?,
        locked_by,
    })
}

// Columns: id, job_id, frequency, target_time_of_day, active
type ScheduleRow = (String, String, String, String, bool);

const SCHEDULE_COLUMNS: &str = "id, job_id, frequency, target_time_of_day, active";

fn read_schedule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_schedule(raw: ScheduleRow) -> Result<Schedule> {
    let (id, job_id, frequency, target_time_of_day, active) = raw;
    let frequency = frequency
        .parse::<Frequency>()
        .map_err(|e| StoreError::Corrupt(format!("schedule {id}: {e}")))?;
    Ok(Schedule {
        id,
        job_id,
        frequency,
        target_time_of_day,
        active,
    })
}

fn insert_instance(tx: &rusqlite::Transaction<'_>, instance: &NewInstance) -> Result<i64> {
    let target_time = checked_timestamp(instance.target_time)?;
    tx.execute(
        "INSERT INTO schedule_instances (schedule_id, job_id, target_time, status)
         VALUES (?1, ?2, ?3, 'queued')",
        rusqlite::params![instance.schedule_id, instance.job_id, target_time],
    )?;
    Ok(tx.last_insert_rowid())
}

impl TaskStore for SqliteStore {
    #[instrument(skip(self))]
    fn enqueue_task(&self, queue_id: &str, task_id: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // A finished task may be queued again; a live one may not.
        let n = tx.execute(
            "INSERT INTO task_queue (queue_id, task_id, status, enqueued_at)
             VALUES (?1, ?2, 'queued', ?3)
             ON CONFLICT (queue_id, task_id) DO UPDATE
                SET status = 'queued', outcome = NULL, locked_by = NULL,
                    locked_at = NULL, completed_at = NULL,
                    enqueued_at = excluded.enqueued_at
              WHERE task_queue.status = 'done'",
            rusqlite::params![queue_id, task_id, now],
        )?;
        tx.commit()?;
        if n == 0 {
            return Err(StoreError::AlreadyQueued {
                queue_id: queue_id.to_string(),
                task_id: task_id.to_string(),
            });
        }
        debug!("task enqueued");
        Ok(())
    }

    #[instrument(skip(self))]
    fn claim_next_task(&self, queue_id: &str, claimant: &str) -> Result<Option<String>> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let task_id = tx
            .query_row(
                "UPDATE task_queue
                    SET status = 'processing', locked_by = ?2, locked_at = ?3
                  WHERE seq = (
                        SELECT seq FROM task_queue
                         WHERE queue_id = ?1 AND status = 'queued'
                         ORDER BY enqueued_at, seq
                         LIMIT 1)
                 RETURNING task_id",
                rusqlite::params![queue_id, claimant, now],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        tx.commit()?;
        Ok(task_id)
    }

    #[instrument(skip(self))]
    fn complete_task(&self, queue_id: &str, task_id: &str, outcome: TaskOutcome) -> Result<bool> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
            "UPDATE task_queue
                SET status = 'done', outcome = ?3, completed_at = ?4
              WHERE queue_id = ?1 AND task_id = ?2 AND status <> 'done'",
            rusqlite::params![queue_id, task_id, outcome.to_string(), now],
        )?;
        tx.commit()?;
        Ok(n > 0)
    }

    fn count_open_tasks(&self, queue_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_queue WHERE queue_id = ?1 AND status <> 'done'",
            [queue_id],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    fn list_open_tasks(&self, queue_id: &str) -> Result<Vec<QueuedTask>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT queue_id, task_id, status, outcome, locked_by FROM task_queue
              WHERE queue_id = ?1 AND status <> 'done'
              ORDER BY enqueued_at, seq",
        )?;
        let rows = stmt
            .query_map([queue_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,         // queue_id
                    row.get::<_, String>(1)?,         // task_id
                    row.get::<_, String>(2)?,         // status
                    row.get::<_, Option<String>>(3)?, // outcome
                    row.get::<_, Option<String>>(4)?, // locked_by
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(queue_id, task_id, status, outcome, locked_by)| {
                let status: TaskStatus = status.parse().map_err(StoreError::Corrupt)?;
                let outcome = outcome
                    .map(|o| o.parse::<TaskOutcome>())
                    .transpose()
                    .map_err(StoreError::Corrupt)?;
                Ok(QueuedTask {
                    queue_id,
                    task_id,
                    status,
                    outcome,
                    locked_by,
                })
            })
            .collect()
    }
}

impl InstanceStore for SqliteStore {
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO schedules (id, job_id, frequency, target_time_of_day, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                schedule.id,
                schedule.job_id,
                schedule.frequency.to_string(),
                schedule.target_time_of_day,
                schedule.active,
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_schedule(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    fn load_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                [id],
                read_schedule_row,
            )
            .optional()?;
        raw.map(decode_schedule).transpose()
    }

    fn load_schedules(&self, active_only: bool) -> Result<Vec<Schedule>> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                  WHERE active = 1 OR ?1 = 0
                  ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([active_only], read_schedule_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        // An undecodable row takes out that schedule only.
        let schedules = rows
            .into_iter()
            .filter_map(|raw| match decode_schedule(raw) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    self.alerts.error(&format!("Skipping schedule: {e}"));
                    None
                }
            })
            .collect();
        Ok(schedules)
    }

    #[instrument(skip(self, instance), fields(schedule_id = %instance.schedule_id))]
    fn enqueue_instance(&self, instance: &NewInstance) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = insert_instance(&tx, instance)?;
        tx.commit()?;
        debug!(instance_id = id, "instance enqueued");
        Ok(id)
    }

    #[instrument(skip(self, instances), fields(count = instances.len()))]
    fn enqueue_instances(&self, instances: &[NewInstance]) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ids = instances
            .iter()
            .map(|instance| insert_instance(&tx, instance))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        debug!(?ids, "instances enqueued");
        Ok(ids)
    }

    #[instrument(skip(self))]
    fn claim_next_instance(
        &self,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleInstance>> {
        let now = format_timestamp(now);
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = tx
            .query_row(
                &format!(
                    "UPDATE schedule_instances
                        SET status = 'processing', locked_by = ?1, locked_at = ?2
                      WHERE instance_id = (
                            SELECT instance_id FROM schedule_instances
                             WHERE status = 'queued' AND target_time <= ?2
                             ORDER BY target_time, instance_id
                             LIMIT 1)
                     RETURNING {INSTANCE_COLUMNS}"
                ),
                rusqlite::params![claimant, now],
                read_instance_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            tx.commit()?;
            return Ok(None);
        };

        // An undecodable row is marked failed inside the claiming transaction.
        let instance_id = raw.0;
        match decode_instance(raw) {
            Ok(instance) => {
                tx.commit()?;
                Ok(Some(instance))
            }
            Err(e) => {
                tx.execute(
                    "UPDATE schedule_instances SET status = 'failed', completed_at = ?2
                      WHERE instance_id = ?1",
                    rusqlite::params![instance_id, now],
                )?;
                tx.commit()?;
                error!(instance_id, "undecodable instance marked failed: {e}");
                self.alerts.error(&format!(
                    "Schedule instance {instance_id} is corrupt and was marked failed: {e}"
                ));
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    fn complete_instance(&self, instance_id: i64, status: InstanceStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(StoreError::NonTerminalStatus(status));
        }
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
            "UPDATE schedule_instances
                SET status = ?2, completed_at = ?3
              WHERE instance_id = ?1 AND status IN ('queued', 'processing')",
            rusqlite::params![instance_id, status.to_string(), now],
        )?;
        tx.commit()?;
        Ok(n > 0)
    }

    fn peek_next_instance(&self) -> Result<Option<ScheduleInstance>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM schedule_instances
                      WHERE status = 'queued'
                      ORDER BY target_time, instance_id
                      LIMIT 1"
                ),
                [],
                read_instance_row,
            )
            .optional()?;
        raw.map(decode_instance).transpose()
    }

    fn instances_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduleInstance>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM schedule_instances
              WHERE target_time >= ?1 AND target_time < ?2
              ORDER BY target_time, instance_id"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![format_timestamp(start), format_timestamp(end)],
                read_instance_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_instance).collect()
    }
}
