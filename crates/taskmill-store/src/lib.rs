//! `taskmill-store`: the persistent store contract and its SQLite backing.
//!
//! # Overview
//!
//! [`contract::TaskStore`] and [`contract::InstanceStore`] are the only
//! operations the scheduler needs from a store. Both claim operations are a
//! single `UPDATE … RETURNING` statement inside a `BEGIN IMMEDIATE`
//! transaction, so two workers on separate connections (or machines sharing
//! a database file) can never claim the same row.
//!
//! [`queue::TaskQueue`] is the generic queue of opaque ids built on
//! [`contract::TaskStore`].

pub mod contract;
pub mod db;
pub mod error;
pub mod queue;
pub mod sqlite;

pub use contract::{InstanceStore, TaskStore};
pub use error::{Result, StoreError};
pub use queue::TaskQueue;
pub use sqlite::SqliteStore;
