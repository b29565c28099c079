//! Generic task queue commands.

use anyhow::Result;
use taskmill_store::TaskQueue;

use crate::Context;

fn open(ctx: &Context) -> Result<TaskQueue> {
    let queue = TaskQueue::new(
        ctx.config.queue.namespace.clone(),
        ctx.config.manager.claimant_identity(),
        ctx.store.clone(),
    )?
    .with_alerts(ctx.alerts.clone());
    Ok(queue)
}

pub fn push(ctx: &Context, task_id: &str) -> Result<()> {
    let queue = open(ctx)?;
    queue.enqueue_task(task_id)?;
    println!("Queued {task_id} on {}", queue.queue_id());
    Ok(())
}

pub fn pop(ctx: &Context) -> Result<()> {
    let queue = open(ctx)?;
    match queue.dequeue_task()? {
        Some(task_id) => println!("{task_id}"),
        None => println!("Queue {} is empty", queue.queue_id()),
    }
    Ok(())
}

pub fn complete(ctx: &Context, task_id: &str) -> Result<()> {
    let queue = open(ctx)?;
    if queue.complete_task(task_id)? {
        println!("Completed {task_id}");
    } else {
        println!("{task_id} was not open; nothing changed");
    }
    Ok(())
}

pub fn fail(ctx: &Context, task_id: &str) -> Result<()> {
    let queue = open(ctx)?;
    if queue.remove_failed_task(task_id)? {
        println!("Removed failed task {task_id}");
    } else {
        println!("{task_id} was not open; nothing changed");
    }
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let queue = open(ctx)?;
    let ids = queue.queued_task_ids()?;
    if ctx.json {
        println!("{}", serde_json::to_string(&ids)?);
        return Ok(());
    }
    println!("{} open task(s) on {}", queue.queued_task_count()?, queue.queue_id());
    for id in ids {
        println!("  {id}");
    }
    Ok(())
}
