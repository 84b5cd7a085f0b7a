//! Cache store.
//!
//! Entries live in an arena keyed by `(inserted_at, sequence)`, which is the
//! FIFO order used for capacity pruning. Side indexes map navigation entries
//! and documents back to their arena key.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::document::Page;
use crate::entry::{CacheEntry, Eviction};
use crate::error::{CacheError, Result};
use crate::ids::{DocumentId, NavigationEntryId, ProcessId};
use crate::placement::ProcessPlacementRegistry;
use crate::reason::EvictionReason;

type ArenaKey = (Instant, u64);

/// Global and foreground entry caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLimits {
    global: usize,
    foreground: usize,
}

impl CapacityLimits {
    /// Validates and creates limits.
    pub fn new(global: usize, foreground: usize) -> Result<Self> {
        if global == 0 || foreground > global {
            return Err(CacheError::InvalidCapacity { global, foreground });
        }
        Ok(Self { global, foreground })
    }

    /// Maximum number of entries counted against the global cap.
    pub fn global(&self) -> usize {
        self.global
    }

    /// Maximum number of foreground-classified entries.
    pub fn foreground(&self) -> usize {
        self.foreground
    }
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self {
            global: 6,
            foreground: 2,
        }
    }
}

/// Owner of all live cache entries.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: BTreeMap<ArenaKey, CacheEntry>,
    by_entry: HashMap<NavigationEntryId, ArenaKey>,
    by_document: HashMap<DocumentId, NavigationEntryId>,
    next_sequence: u64,
    limits: CapacityLimits,
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new(limits: CapacityLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Capacity limits in effect.
    pub fn limits(&self) -> CapacityLimits {
        self.limits
    }

    /// Replaces the limits and prunes to them.
    pub fn set_limits(
        &mut self,
        limits: CapacityLimits,
        registry: &mut ProcessPlacementRegistry,
    ) -> Vec<Eviction> {
        self.limits = limits;
        self.prune(registry)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a live entry exists for `entry_id`.
    pub fn contains(&self, entry_id: NavigationEntryId) -> bool {
        self.by_entry.contains_key(&entry_id)
    }

    /// Looks up a live entry.
    pub fn get(&self, entry_id: NavigationEntryId) -> Option<&CacheEntry> {
        self.by_entry
            .get(&entry_id)
            .and_then(|key| self.entries.get(key))
    }

    pub(crate) fn get_mut(&mut self, entry_id: NavigationEntryId) -> Option<&mut CacheEntry> {
        let key = self.by_entry.get(&entry_id)?;
        self.entries.get_mut(key)
    }

    /// Finds the entry holding `document`.
    pub fn entry_for_document(&self, document: DocumentId) -> Option<NavigationEntryId> {
        self.by_document.get(&document).copied()
    }

    /// Entries with a document backed by `process`.
    pub fn entries_owned_by(&self, process: ProcessId) -> Vec<NavigationEntryId> {
        self.iter()
            .filter(|entry| entry.owning_processes().contains(&process))
            .map(CacheEntry::entry_id)
            .collect()
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Returns true if any owning process of `entry` is foregrounded.
    pub fn is_foreground(&self, entry: &CacheEntry, registry: &ProcessPlacementRegistry) -> bool {
        registry.any_foregrounded(entry.owning_processes())
    }

    /// Number of foreground-classified entries.
    pub fn foreground_len(&self, registry: &ProcessPlacementRegistry) -> usize {
        self.iter()
            .filter(|entry| self.is_foreground(entry, registry))
            .count()
    }

    /// Earliest scheduler deadline over all entries.
    pub fn next_deadline(&self, ttl: Duration) -> Option<Instant> {
        self.iter().map(|entry| entry.deadline(ttl)).min()
    }

    /// Stores `page` and prunes to capacity.
    ///
    /// Fails if a live entry already exists for the page's navigation entry.
    /// The returned evictions may include the new entry itself when the
    /// foreground cap is zero.
    pub fn insert(
        &mut self,
        page: Page,
        now: Instant,
        freeze_timeout: Duration,
        registry: &mut ProcessPlacementRegistry,
    ) -> Result<Vec<Eviction>> {
        if self.contains(page.entry_id) {
            return Err(CacheError::DuplicateEntry(page.entry_id));
        }

        let sequence = self.next_sequence;
        let entry = CacheEntry::new(page, sequence, now, freeze_timeout)?;
        self.next_sequence += 1;

        let entry_id = entry.entry_id();
        let key = (now, sequence);
        for process in entry.referenced_processes() {
            registry.attach(process);
        }
        for document in entry.document_ids() {
            self.by_document.insert(document, entry_id);
        }
        self.by_entry.insert(entry_id, key);
        self.entries.insert(key, entry);
        debug!(%entry_id, sequence, entries = self.entries.len(), "page stored");

        Ok(self.prune(registry))
    }

    /// Removes a live entry for reactivation.
    pub fn try_restore(
        &mut self,
        entry_id: NavigationEntryId,
        registry: &mut ProcessPlacementRegistry,
    ) -> Option<CacheEntry> {
        let (entry, _) = self.detach(entry_id, registry)?;
        debug!(%entry_id, "entry taken for restore");
        Some(entry)
    }

    /// Evicts one entry.
    pub fn remove(
        &mut self,
        entry_id: NavigationEntryId,
        reason: EvictionReason,
        registry: &mut ProcessPlacementRegistry,
    ) -> Option<Eviction> {
        let (entry, released_processes) = self.detach(entry_id, registry)?;
        debug!(%entry_id, %reason, "entry evicted");
        let mut eviction = entry.evict(reason);
        eviction.released_processes = released_processes;
        Some(eviction)
    }

    /// Evicts every entry with [`EvictionReason::Flushed`].
    pub fn flush(&mut self, registry: &mut ProcessPlacementRegistry) -> Vec<Eviction> {
        let ids: Vec<_> = self.iter().map(CacheEntry::entry_id).collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id, EvictionReason::Flushed, registry))
            .collect()
    }

    /// Enforces the foreground and global caps.
    ///
    /// Entries are walked newest first. A foreground-classified entry beyond
    /// the foreground cap is evicted with `ForegroundCacheLimit` and does not
    /// count toward the global cap; every surviving entry counts toward the
    /// global cap and is evicted with `CacheLimit` once it is exceeded.
    pub fn prune(&mut self, registry: &mut ProcessPlacementRegistry) -> Vec<Eviction> {
        let mut total = 0;
        let mut foreground = 0;
        let mut victims = Vec::new();

        for entry in self.entries.values().rev() {
            if self.is_foreground(entry, registry) {
                foreground += 1;
                if foreground > self.limits.foreground {
                    victims.push((entry.entry_id(), EvictionReason::ForegroundCacheLimit));
                    continue;
                }
            }
            total += 1;
            if total > self.limits.global {
                victims.push((entry.entry_id(), EvictionReason::CacheLimit));
            }
        }

        if !victims.is_empty() {
            trace!(victims = victims.len(), total, foreground, "pruning to capacity");
        }

        victims
            .into_iter()
            .rev()
            .filter_map(|(id, reason)| self.remove(id, reason, registry))
            .collect()
    }

    fn detach(
        &mut self,
        entry_id: NavigationEntryId,
        registry: &mut ProcessPlacementRegistry,
    ) -> Option<(CacheEntry, Vec<ProcessId>)> {
        let key = self.by_entry.remove(&entry_id)?;
        let entry = self.entries.remove(&key)?;
        for document in entry.documents() {
            self.by_document.remove(&document.id());
        }
        let released = entry
            .referenced_processes()
            .into_iter()
            .filter(|process| registry.detach(*process))
            .collect();
        Some((entry, released))
    }
}
