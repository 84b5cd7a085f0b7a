//! Eviction scheduling.
//!
//! One timer covers the whole store: it is armed at the earliest entry
//! deadline (expiry or end of the freeze grace period) and re-armed after
//! every change. Host signals are applied here as well, so every eviction
//! that is not driven by the navigation controller goes through one place.

use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::document::Capabilities;
use crate::entry::Eviction;
use crate::error::{CacheError, Result};
use crate::ids::{DocumentId, NavigationEntryId, ProcessId};
use crate::placement::{PlacementChange, ProcessPlacementRegistry};
use crate::reason::EvictionReason;
use crate::signal::{DisqualifyingEvent, HostSignal};
use crate::store::CacheStore;

/// Default entry lifetime.
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(3600);

/// Default freeze grace period.
pub const DEFAULT_FREEZE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Time-based and signal-driven eviction.
#[derive(Debug, Clone)]
pub struct EvictionScheduler {
    time_to_live: Duration,
    freeze_timeout: Duration,
    armed: Option<Instant>,
}

impl EvictionScheduler {
    /// Creates a scheduler.
    pub fn new(time_to_live: Duration, freeze_timeout: Duration) -> Result<Self> {
        if time_to_live.is_zero() {
            return Err(CacheError::ZeroTimeToLive);
        }
        Ok(Self {
            time_to_live,
            freeze_timeout,
            armed: None,
        })
    }

    /// Entry lifetime.
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Changes the entry lifetime. Applies to existing entries.
    pub fn set_time_to_live(&mut self, time_to_live: Duration) -> Result<()> {
        if time_to_live.is_zero() {
            return Err(CacheError::ZeroTimeToLive);
        }
        debug!(ttl = ?time_to_live, "time to live changed");
        self.time_to_live = time_to_live;
        Ok(())
    }

    /// Freeze grace period given to newly stored entries.
    pub fn freeze_timeout(&self) -> Duration {
        self.freeze_timeout
    }

    /// Currently armed deadline.
    pub fn armed(&self) -> Option<Instant> {
        self.armed
    }

    /// Re-arms the timer at the earliest deadline in `store`.
    pub fn rearm(&mut self, store: &CacheStore) -> Option<Instant> {
        let next = store.next_deadline(self.time_to_live);
        if next != self.armed {
            trace!(?next, "timer re-armed");
        }
        self.armed = next;
        next
    }

    /// Evicts every entry whose deadline has passed.
    ///
    /// An entry still freezing at the end of its grace period is evicted with
    /// `TimeoutPuttingInCache`; an entry at or past its lifetime with
    /// `Timeout`.
    pub fn fire(
        &mut self,
        store: &mut CacheStore,
        registry: &mut ProcessPlacementRegistry,
        now: Instant,
    ) -> Vec<Eviction> {
        let due: Vec<(NavigationEntryId, EvictionReason)> = store
            .iter()
            .filter_map(|entry| {
                if entry.freeze_deadline().is_some_and(|deadline| now >= deadline) {
                    Some((entry.entry_id(), EvictionReason::TimeoutPuttingInCache))
                } else if entry.is_expired(now, self.time_to_live) {
                    Some((entry.entry_id(), EvictionReason::Timeout))
                } else {
                    None
                }
            })
            .collect();

        let evictions: Vec<_> = due
            .into_iter()
            .filter_map(|(id, reason)| store.remove(id, reason, registry))
            .collect();
        self.rearm(store);
        evictions
    }

    /// Applies a host signal.
    ///
    /// `ActivationAcknowledged` belongs to restoration and is ignored here.
    pub fn handle(
        &mut self,
        signal: &HostSignal,
        store: &mut CacheStore,
        registry: &mut ProcessPlacementRegistry,
    ) -> Vec<Eviction> {
        let evictions = match signal {
            HostSignal::ProcessPlacementChanged {
                process,
                foregrounded,
            } => {
                let change = registry.set_foregrounded(*process, *foregrounded);
                if change == PlacementChange::BecameForeground && registry.references(*process) > 0 {
                    store.prune(registry)
                } else {
                    Vec::new()
                }
            }
            HostSignal::ProcessTerminated { process } => {
                self.process_terminated(*process, store, registry)
            }
            HostSignal::Disqualified { document, event } => {
                self.disqualified(*document, event, store, registry)
            }
            HostSignal::FreezeAcknowledged { document } => {
                if let Some(entry) = store
                    .entry_for_document(*document)
                    .and_then(|id| store.get_mut(id))
                {
                    if entry.acknowledge_freeze(*document) {
                        debug!(entry_id = %entry.entry_id(), "entry frozen");
                    }
                }
                Vec::new()
            }
            HostSignal::ActivationAcknowledged { .. } => Vec::new(),
        };
        self.rearm(store);
        evictions
    }

    fn process_terminated(
        &mut self,
        process: ProcessId,
        store: &mut CacheStore,
        registry: &mut ProcessPlacementRegistry,
    ) -> Vec<Eviction> {
        let owned = store.entries_owned_by(process);
        if !owned.is_empty() {
            warn!(%process, entries = owned.len(), "process terminated with cached documents");
        }
        let evictions = owned
            .into_iter()
            .filter_map(|id| store.remove(id, EvictionReason::RendererProcessKilled, registry))
            .collect();
        registry.forget(process);
        evictions
    }

    fn disqualified(
        &mut self,
        document: DocumentId,
        event: &DisqualifyingEvent,
        store: &mut CacheStore,
        registry: &mut ProcessPlacementRegistry,
    ) -> Vec<Eviction> {
        let Some(entry_id) = store.entry_for_document(document) else {
            trace!(%document, "signal for uncached document");
            return Vec::new();
        };

        let reason = match event {
            DisqualifyingEvent::ScriptExecuted => Some(EvictionReason::JavaScriptExecution),
            DisqualifyingEvent::MessageReceived => {
                if let Some(entry) = store.get_mut(entry_id) {
                    entry.record_use(document, Capabilities::OUT_OF_BAND_MESSAGE);
                }
                None
            }
            DisqualifyingEvent::DisableCaching { detail } => {
                Some(EvictionReason::DisableForRenderFrameHostCalled {
                    detail: detail.clone(),
                })
            }
            DisqualifyingEvent::FeatureUsed { features } => {
                let Some(entry) = store.get_mut(entry_id) else {
                    return Vec::new();
                };
                entry.record_use(document, *features);
                let incompatible = features.incompatible();
                if incompatible.is_empty() {
                    None
                } else if entry.is_freezing() {
                    debug!(%entry_id, %document, features = %incompatible, "feature used while freezing");
                    None
                } else {
                    Some(EvictionReason::SchedulerTrackedFeatureUsed {
                        features: incompatible,
                    })
                }
            }
            DisqualifyingEvent::ActivationDisallowed { reason } => {
                Some(EvictionReason::IgnoreEventAndEvict {
                    disallow_activation_reason: *reason,
                })
            }
        };

        reason
            .and_then(|reason| store.remove(entry_id, reason, registry))
            .into_iter()
            .collect()
    }
}

impl Default for EvictionScheduler {
    fn default() -> Self {
        Self {
            time_to_live: DEFAULT_TIME_TO_LIVE,
            freeze_timeout: DEFAULT_FREEZE_TIMEOUT,
            armed: None,
        }
    }
}
