//! Subcommand implementations.

pub mod queue;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use taskmill_core::{Frequency, Schedule};
use taskmill_scheduler::{InstanceWindow, ManagerHandle};
use tracing::info;

use crate::Context;

/// Poll until Ctrl-C.
pub async fn run(ctx: &Context, force: bool) -> Result<()> {
    let Some(handle) = start_polling(ctx, force)? else {
        return Ok(());
    };
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping");
    handle.stop().await;
    Ok(())
}

/// Initialize and spawn the polling loop, unless auto_start is off.
/// Only the manager section can stop polling from starting.
fn start_polling(ctx: &Context, force: bool) -> Result<Option<ManagerHandle>> {
    ctx.manager.initialize();

    if !ctx.config.manager.auto_start && !force {
        info!("manager.auto_start is false; not polling (pass --force to override)");
        return Ok(None);
    }
    Ok(Some(ctx.manager.start()?))
}

pub fn schedule_day(ctx: &Context, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let count = ctx.manager.schedule_instances_for_date(date)?;
    println!("Enqueued {count} instance(s) for {date}");
    Ok(())
}

pub fn enqueue_test(ctx: &Context) -> Result<()> {
    let id = ctx.manager.queue_test_job()?;
    println!("Queued TestJob as instance {id}");
    Ok(())
}

pub fn instances(ctx: &Context, date: Option<NaiveDate>) -> Result<()> {
    let window = match date {
        Some(date) => InstanceWindow::for_date(date),
        None => InstanceWindow::today(),
    };
    let instances = ctx.manager.query_instances(window)?;

    if ctx.json {
        for instance in &instances {
            println!("{}", serde_json::to_string(instance)?);
        }
        return Ok(());
    }
    if instances.is_empty() {
        println!("No instances between {} and {}", window.start, window.end);
    }
    for i in &instances {
        println!(
            "{:>6}  {}  {:<10}  {:<20}  {}",
            i.instance_id,
            i.target_time.format("%Y-%m-%d %H:%M:%S"),
            i.status,
            i.job_id,
            i.locked_by.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct NextDue {
    target_time: Option<DateTime<Utc>>,
}

pub fn next(ctx: &Context) -> Result<()> {
    let target_time = ctx.manager.repository().get_next_instance_time()?;
    if ctx.json {
        println!("{}", serde_json::to_string(&NextDue { target_time })?);
        return Ok(());
    }
    match target_time {
        Some(t) => println!("Next instance due at {t}"),
        None => println!("No queued instances"),
    }
    Ok(())
}

pub fn schedules(ctx: &Context, all: bool) -> Result<()> {
    let repo = ctx.manager.repository();
    let schedules = if all {
        repo.get_all_schedules()?
    } else {
        repo.get_schedules()?
    };

    if ctx.json {
        for schedule in &schedules {
            println!("{}", serde_json::to_string(schedule)?);
        }
        return Ok(());
    }
    for s in &schedules {
        println!(
            "{:<20}  {:<20}  {:<16}  {:<10}  {}",
            s.id,
            s.job_id,
            s.frequency,
            s.target_time_of_day,
            if s.active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

pub fn add_schedule(
    ctx: &Context,
    id: String,
    job_id: String,
    at: String,
    frequency: Frequency,
    active: bool,
) -> Result<()> {
    if !frequency.is_implemented() {
        bail!("frequency {frequency} is not implemented; use none, once, daily or work_days");
    }
    let schedule = Schedule {
        id,
        job_id,
        frequency,
        target_time_of_day: at,
        active,
    };
    ctx.manager.repository().add_schedule(&schedule)?;
    println!("Added schedule {}", schedule.id);
    Ok(())
}

pub fn remove_schedule(ctx: &Context, id: &str) -> Result<()> {
    ctx.manager.repository().remove_schedule(id)?;
    println!("Removed schedule {id}");
    Ok(())
}

pub fn remove_instance(ctx: &Context, id: i64) -> Result<()> {
    if ctx.manager.repository().remove_instance(id)? {
        println!("Instance {id} marked failed");
    } else {
        println!("Instance {id} was not open; nothing changed");
    }
    Ok(())
}
