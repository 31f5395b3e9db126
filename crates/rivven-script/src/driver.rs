//! Host-facing destination interface
//!
//! The host's threaded destination framework drives a destination through
//! `start`, then `insert` from any number of worker threads, then `stop`.
//! It keys statistics and persisted state by the two identity strings.

use crate::bridge::ScriptBridge;
use crate::record::Record;
use std::fmt;

/// Per-record result handed back to the host
///
/// There is no retry variant: a record that fails in the script is
/// dropped, never redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerInsertResult {
    /// The record was processed
    Success,
    /// The record was discarded
    Drop,
}

impl WorkerInsertResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for WorkerInsertResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// A destination driven by a pool of worker threads
pub trait ThreadedDestination: Send + Sync {
    /// Prepare the destination; `false` means the host must not deliver
    fn start(&self) -> bool;

    /// Process one record
    fn insert(&self, record: &Record) -> WorkerInsertResult;

    /// Shut down; safe to call more than once
    fn stop(&self) -> bool;

    /// Key for the host's statistics registry
    fn stats_instance(&self) -> String;

    /// Key for the host's persistent state
    fn persist_name(&self) -> String;
}

impl ThreadedDestination for ScriptBridge {
    fn start(&self) -> bool {
        ScriptBridge::start(self)
    }

    fn insert(&self, record: &Record) -> WorkerInsertResult {
        ScriptBridge::insert(self, record)
    }

    fn stop(&self) -> bool {
        ScriptBridge::stop(self)
    }

    fn stats_instance(&self) -> String {
        ScriptBridge::stats_instance(self)
    }

    fn persist_name(&self) -> String {
        ScriptBridge::persist_name(self)
    }
}
