// src/lib.rs

//! sdkwatch
//!
//! Tracks the target SDK level and version of installed Android apps over
//! time and derives a change log from the recorded history.
//!
//! # Architecture
//!
//! - Database-first: apps, version history and preferences all live in SQLite
//! - Append-only history: version records are keyed by a content hash, so
//!   re-syncing an unchanged package is a no-op
//! - Push-based views: the store notifies subscribers after each commit and
//!   live queries re-derive themselves from those notifications
//! - Pluggable package sources: JSON snapshots, captured `dumpsys` output,
//!   or a live device over `adb`

pub mod db;
mod error;
pub mod prefs;
pub mod query;
pub mod scheduler;
pub mod source;
pub mod sync;

pub use db::Store;
pub use error::{Error, Result};
