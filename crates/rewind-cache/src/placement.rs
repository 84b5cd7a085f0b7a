//! Process placement registry.
//!
//! Records which processes are foregrounded and how many cache entries
//! reference each one. The registry is owned by the cache and passed to the
//! store explicitly; it is never reached through a global.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::ids::ProcessId;

/// Result of reporting a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementChange {
    /// Nothing changed.
    Unchanged,
    /// The process moved from background to foreground.
    BecameForeground,
    /// The process moved from foreground to background.
    BecameBackground,
}

#[derive(Debug, Clone, Copy, Default)]
struct ProcessRecord {
    foregrounded: bool,
    references: usize,
}

/// Foreground/background state and cache references per process.
///
/// Processes never reported are treated as background.
#[derive(Debug, Default)]
pub struct ProcessPlacementRegistry {
    processes: HashMap<ProcessId, ProcessRecord>,
}

impl ProcessPlacementRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a process' placement.
    pub fn set_foregrounded(&mut self, process: ProcessId, foregrounded: bool) -> PlacementChange {
        let record = self.processes.entry(process).or_default();
        let change = match (record.foregrounded, foregrounded) {
            (false, true) => PlacementChange::BecameForeground,
            (true, false) => PlacementChange::BecameBackground,
            _ => PlacementChange::Unchanged,
        };
        record.foregrounded = foregrounded;
        if change != PlacementChange::Unchanged {
            debug!(%process, foregrounded, "process placement changed");
        }
        self.prune(process);
        change
    }

    /// Returns true if the process is foregrounded.
    pub fn is_foregrounded(&self, process: ProcessId) -> bool {
        self.processes
            .get(&process)
            .is_some_and(|record| record.foregrounded)
    }

    /// Returns true if any of `processes` is foregrounded.
    pub fn any_foregrounded<'a>(&self, processes: impl IntoIterator<Item = &'a ProcessId>) -> bool {
        processes
            .into_iter()
            .any(|process| self.is_foregrounded(*process))
    }

    /// Adds a cache reference to `process`.
    pub fn attach(&mut self, process: ProcessId) {
        let record = self.processes.entry(process).or_default();
        record.references += 1;
        trace!(%process, references = record.references, "process attached");
    }

    /// Drops a cache reference to `process`.
    ///
    /// Returns true if no cache entry references the process any more.
    pub fn detach(&mut self, process: ProcessId) -> bool {
        let released = match self.processes.get_mut(&process) {
            Some(record) if record.references > 0 => {
                record.references -= 1;
                trace!(%process, references = record.references, "process detached");
                record.references == 0
            }
            _ => false,
        };
        self.prune(process);
        released
    }

    /// Number of cache entries referencing `process`.
    pub fn references(&self, process: ProcessId) -> usize {
        self.processes
            .get(&process)
            .map_or(0, |record| record.references)
    }

    /// Records that a process has exited.
    ///
    /// An exited process is never foregrounded. References still held by
    /// proxies of surviving entries are kept until those entries detach.
    pub fn forget(&mut self, process: ProcessId) {
        if let Some(record) = self.processes.get_mut(&process) {
            record.foregrounded = false;
            debug!(%process, references = record.references, "process exited");
        }
        self.prune(process);
    }

    // Background records without references carry no state.
    fn prune(&mut self, process: ProcessId) {
        if let Some(record) = self.processes.get(&process) {
            if !record.foregrounded && record.references == 0 {
                self.processes.remove(&process);
            }
        }
    }

    /// Number of known processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns true if no process is known.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
