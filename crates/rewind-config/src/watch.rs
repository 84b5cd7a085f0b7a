//! Configuration file watching for hot-reload.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use crate::ConfigHolder;

/// Configuration file watcher.
pub struct ConfigWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher.
    pub fn new() -> notify::Result<Self> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        Ok(Self {
            watcher,
            receiver: rx,
        })
    }

    /// Starts watching a file.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> notify::Result<()> {
        self.watcher
            .watch(path.as_ref(), RecursiveMode::NonRecursive)
    }

    /// Stops watching a file.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> notify::Result<()> {
        self.watcher.unwatch(path.as_ref())
    }

    /// Checks for file changes (non-blocking).
    ///
    /// Returns `Some(true)` for a content change, `Some(false)` for any
    /// other event and `None` when nothing is pending.
    pub fn poll(&self) -> Option<bool> {
        match self.receiver.try_recv() {
            Ok(Ok(event)) => Some(is_change(&event.kind)),
            _ => None,
        }
    }

    /// Waits up to `timeout` for a file change.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => Some(is_change(&event.kind)),
            _ => None,
        }
    }

    /// Drains pending events and reloads `holder` if any of them changed
    /// the file. Returns true when a new configuration was installed.
    pub fn reload_if_changed(&self, holder: &ConfigHolder) -> crate::Result<bool> {
        let mut changed = false;
        while let Some(event) = self.poll() {
            changed |= event;
        }
        if changed {
            holder.reload()?;
        }
        Ok(changed)
    }
}

fn is_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}
