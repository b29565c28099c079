// N workers, each with its own connection to the same database file, race
// for rows. Every row must be handed out exactly once.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use taskmill_core::NewInstance;
use taskmill_store::{InstanceStore, SqliteStore, TaskQueue, TaskStore};

const WORKERS: usize = 8;

fn open(path: &std::path::Path) -> SqliteStore {
    SqliteStore::open(path, Duration::from_secs(10)).unwrap()
}

#[test]
fn single_due_instance_is_claimed_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");

    let seed = open(&path);
    let id = seed
        .enqueue_instance(&NewInstance::ad_hoc(
            "TestJob",
            Utc::now() - chrono::Duration::seconds(5),
        ))
        .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|n| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store = open(&path);
                barrier.wait();
                store
                    .claim_next_instance(&format!("worker-{n}"), Utc::now())
                    .unwrap()
            })
        })
        .collect();

    let claims: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(claims.len(), 1, "exactly one worker may win the claim");
    assert_eq!(claims[0].instance_id, id);
}

#[test]
fn every_task_is_claimed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    const TASKS: usize = 40;

    let seed: Arc<dyn TaskStore> = Arc::new(open(&path));
    let producer = TaskQueue::new("race", "producer", seed).unwrap();
    for n in 0..TASKS {
        producer.enqueue_task(&format!("task-{n}")).unwrap();
    }

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|n| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store: Arc<dyn TaskStore> = Arc::new(open(&path));
                let queue = TaskQueue::new("race", format!("worker-{n}"), store).unwrap();
                barrier.wait();
                let mut mine = Vec::new();
                while let Some(task) = queue.dequeue_task().unwrap() {
                    assert!(queue.complete_task(&task).unwrap());
                    mine.push(task);
                }
                mine
            })
        })
        .collect();

    let all: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let unique: HashSet<_> = all.iter().cloned().collect();

    assert_eq!(all.len(), TASKS, "no task may be handed out twice");
    assert_eq!(unique.len(), TASKS, "no task may be lost");
    assert_eq!(producer.queued_task_count().unwrap(), 0);
}
