//! # Rewind Back/Forward Cache
//!
//! Keeps recently left pages suspended in memory so that history
//! navigations can reactivate them instead of loading them again.
//!
//! ## Architecture
//!
//! - **Eligibility**: decides at store time whether a page may be cached
//! - **Store**: owns entries in FIFO order and enforces the global and
//!   foreground caps
//! - **Scheduler**: one timer for expiry and freeze grace periods, plus
//!   host signals (crashes, placement changes, disqualifying events)
//! - **Restoration**: drives reactivation; an eviction racing a restore
//!   always wins and the navigation is reissued exactly once
//!
//! [`BackForwardCache`] ties these together and is fully synchronous: every
//! operation takes the current time as an argument. [`service`] runs it as a
//! single tokio task fed by command and signal channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use rewind_filter::{DomainPolicy, QueryParam, UrlPattern};
use rewind_metrics::metrics;

pub mod document;
pub mod eligibility;
pub mod entry;
pub mod error;
pub mod history;
pub mod ids;
pub mod lifecycle;
pub mod placement;
pub mod reason;
pub mod restore;
pub mod scheduler;
pub mod service;
pub mod signal;
pub mod store;

pub use document::{Capabilities, DocumentInstance, Page, ProxyHandle};
pub use eligibility::{Eligibility, EligibilityPolicy};
pub use entry::{CacheEntry, EntrySnapshot, Eviction, FreezeState, RestoredPage};
pub use error::{CacheError, Result};
pub use ids::{DocumentId, DomainGroupId, NavigationEntryId, ProcessId, ProxyId, RestoreToken};
pub use lifecycle::{LifecycleState, NavigationSlots};
pub use placement::ProcessPlacementRegistry;
pub use reason::{EvictionReason, IneligibleReason, IneligibleReasons, NotRestoredReason};
pub use restore::{ActivationContext, FreshNavigation, RestoreState};
pub use scheduler::EvictionScheduler;
pub use service::{CacheEvent, CacheHandle, CacheService, RestoreOutcome};
pub use signal::{DisqualifyingEvent, HostSignal};
pub use store::{CacheStore, CapacityLimits};

use history::NotRestoredLog;
use restore::RestorationCoordinator;

/// Back/forward cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch.
    pub enabled: bool,

    /// Global entry cap.
    pub cache_size: usize,

    /// Cap on foreground-classified entries.
    pub foreground_cache_size: usize,

    /// Entry lifetime.
    pub time_to_live: Duration,

    /// Grace period for documents to acknowledge freezing.
    pub freeze_timeout: Duration,

    /// Evicted or rejected entries remembered for diagnostics.
    pub eviction_log_size: usize,

    /// Allow list, block list and blocked query parameters.
    pub domain_policy: DomainPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_size: 6,
            foreground_cache_size: 2,
            time_to_live: scheduler::DEFAULT_TIME_TO_LIVE,
            freeze_timeout: scheduler::DEFAULT_FREEZE_TIMEOUT,
            eviction_log_size: 1000,
            domain_policy: DomainPolicy::new(),
        }
    }
}

/// Side effects of a cache operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheEffects {
    /// Entries evicted, oldest first.
    pub evicted: Vec<Eviction>,

    /// Restore attempts aborted by those evictions.
    pub reissued: Vec<FreshNavigation>,

    /// Pages handed back to the navigation controller.
    pub restored: Vec<RestoredPage>,
}

impl CacheEffects {
    /// Returns true if nothing happened.
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.reissued.is_empty() && self.restored.is_empty()
    }

    /// Navigation entries that were evicted.
    pub fn evicted_ids(&self) -> Vec<NavigationEntryId> {
        self.evicted.iter().map(|eviction| eviction.entry_id).collect()
    }

    fn merge(&mut self, other: CacheEffects) {
        self.evicted.extend(other.evicted);
        self.reissued.extend(other.reissued);
        self.restored.extend(other.restored);
    }
}

/// Result of [`BackForwardCache::store_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The page is cached. Capacity pruning may have evicted others.
    Stored {
        /// Stored entry.
        entry_id: NavigationEntryId,
        /// Evictions caused by the store.
        effects: CacheEffects,
    },
    /// The page was refused and its documents discarded.
    Rejected {
        /// Refused entry.
        entry_id: NavigationEntryId,
        /// Every failing check.
        reasons: IneligibleReasons,
    },
}

impl StoreOutcome {
    /// Returns true if the page was cached.
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// Result of [`BackForwardCache::begin_restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStart {
    /// An attempt is in flight.
    Requested(RestoreToken),
    /// The entry is not cached; navigate normally.
    NotRestored(NotRestoredReason),
}

/// Result of [`BackForwardCache::check_activation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationCheck {
    /// The host may activate `documents`, then acknowledge.
    Ready {
        /// Attempt.
        token: RestoreToken,
        /// Entry being restored.
        entry_id: NavigationEntryId,
        /// Documents to activate, root first.
        documents: Vec<DocumentId>,
    },
    /// A check failed; the entry was evicted and the navigation reissued.
    Failed(CacheEffects),
}

/// Back/forward cache.
pub struct BackForwardCache {
    eligibility: EligibilityPolicy,
    store: CacheStore,
    placement: ProcessPlacementRegistry,
    scheduler: EvictionScheduler,
    restorer: RestorationCoordinator,
    slots: NavigationSlots,
    history: NotRestoredLog,
    stats: CacheStats,
}

impl BackForwardCache {
    /// Creates a cache.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let limits = CapacityLimits::new(config.cache_size, config.foreground_cache_size)?;
        let scheduler = EvictionScheduler::new(config.time_to_live, config.freeze_timeout)?;

        Ok(Self {
            eligibility: EligibilityPolicy::new(config.enabled, config.domain_policy),
            store: CacheStore::new(limits),
            placement: ProcessPlacementRegistry::new(),
            scheduler,
            restorer: RestorationCoordinator::new(),
            slots: NavigationSlots::new(),
            history: NotRestoredLog::new(config.eviction_log_size),
            stats: CacheStats::default(),
        })
    }

    // =========================================================================
    // Navigation controller
    // =========================================================================

    /// Tries to cache a page the user is navigating away from.
    ///
    /// Fails only if the page's documents are not active.
    pub fn store_page(&mut self, page: Page, now: Instant) -> Result<StoreOutcome> {
        let entry_id = page.entry_id;
        let eligibility = self.eligibility.can_store(&page);
        self.eligibility.clear_page(&page);

        if let Eligibility::Ineligible(reasons) = eligibility {
            debug!(%entry_id, url = %page.url(), ?reasons, "page not cacheable");
            self.slots.vacate(entry_id, page.main.id());
            self.stats.record_rejection();
            if let Some(reason) = reasons.first() {
                metrics().record_store_rejected(reason.as_str());
            }
            self.history
                .record(entry_id, NotRestoredReason::Ineligible(reasons.clone()));
            return Ok(StoreOutcome::Rejected { entry_id, reasons });
        }

        // A second live entry for one navigation entry is a caller bug. Debug
        // builds stop here; release builds replace the stale entry.
        #[cfg(not(test))]
        debug_assert!(
            !self.store.contains(entry_id),
            "navigation entry {entry_id} cached twice"
        );

        let mut effects = CacheEffects::default();
        if self.store.contains(entry_id) {
            error!(%entry_id, "navigation entry already cached, replacing stale entry");
            effects.merge(self.evict(entry_id, EvictionReason::Superseded));
        }

        let main = page.main.id();
        let freeze_timeout = self.scheduler.freeze_timeout();
        let evicted = self
            .store
            .insert(page, now, freeze_timeout, &mut self.placement)?;

        if let Err(e) = self.slots.cache(entry_id, main) {
            warn!(%entry_id, error = %e, "navigation slot already held");
        }
        self.history.forget(entry_id);
        self.stats.record_store();
        metrics().record_store();
        debug!(%entry_id, entries = self.store.len(), "page cached");

        effects.merge(self.finish(evicted));
        self.scheduler.rearm(&self.store);
        Ok(StoreOutcome::Stored { entry_id, effects })
    }

    /// Starts restoring `entry_id`.
    pub fn begin_restore(
        &mut self,
        entry_id: NavigationEntryId,
        context: ActivationContext,
        now: Instant,
    ) -> Result<RestoreStart> {
        let Some(entry) = self.store.get(entry_id) else {
            let reason = self
                .history
                .get(entry_id)
                .cloned()
                .unwrap_or(NotRestoredReason::NotInCache);
            debug!(%entry_id, %reason, "history navigation not served from cache");
            self.stats.record_not_restored();
            metrics().record_not_restored(reason.as_str());
            return Ok(RestoreStart::NotRestored(reason));
        };

        let token = self.restorer.begin(entry, context, now)?;
        Ok(RestoreStart::Requested(token))
    }

    /// Runs the pre-activation checks of an attempt.
    pub fn check_activation(&mut self, token: RestoreToken) -> Result<ActivationCheck> {
        let (entry_id, context) = match self.restorer.attempt(token) {
            Some(attempt) => (attempt.entry_id, attempt.context.clone()),
            None => return Err(self.settled_error(token)),
        };
        let (failure, documents) = {
            let entry = self
                .store
                .get(entry_id)
                .ok_or(CacheError::UnknownRestore(token))?;
            (context.check(entry), entry.document_ids())
        };

        match failure {
            None => {
                self.restorer.checks_passed(token)?;
                Ok(ActivationCheck::Ready {
                    token,
                    entry_id,
                    documents,
                })
            }
            Some(reason) => {
                info!(%token, %entry_id, %reason, "activation check failed");
                Ok(ActivationCheck::Failed(self.evict(entry_id, reason)))
            }
        }
    }

    /// Completes an attempt after the host activated its documents.
    pub fn commit_restore(&mut self, token: RestoreToken, now: Instant) -> Result<RestoredPage> {
        let attempt = self.restorer.commit(token)?;
        let entry = self
            .store
            .try_restore(attempt.entry_id, &mut self.placement)
            .ok_or(CacheError::UnknownRestore(token))?;
        let main = entry.main_document();
        let page = entry.restore(token)?;

        self.slots.activate(attempt.entry_id, main)?;
        self.history.forget(attempt.entry_id);
        self.stats.record_restore();
        metrics().record_restore();
        metrics().record_restore_latency(now.saturating_duration_since(attempt.requested_at));
        info!(%token, entry_id = %attempt.entry_id, url = %page.url, "page restored");

        self.scheduler.rearm(&self.store);
        self.update_gauges();
        Ok(page)
    }

    /// Cancels an attempt. The entry is evicted and nothing is reissued.
    pub fn cancel_restore(&mut self, token: RestoreToken) -> Result<CacheEffects> {
        let attempt = self.restorer.cancel(token)?;
        Ok(self.evict(
            attempt.entry_id,
            EvictionReason::NavigationCancelledWhileRestoring,
        ))
    }

    /// Registers the active document of a navigation entry.
    pub fn activate_document(&mut self, entry_id: NavigationEntryId, document: DocumentId) -> Result<()> {
        self.slots.activate(entry_id, document)
    }

    /// Registers a speculative document for an in-flight navigation.
    pub fn add_speculative(&mut self, entry_id: NavigationEntryId, document: DocumentId) {
        self.slots.add_speculative(entry_id, document);
    }

    /// Marks a speculative document chosen for commit.
    pub fn ready_to_commit(&mut self, entry_id: NavigationEntryId, document: DocumentId) -> Result<()> {
        self.slots.ready_to_commit(entry_id, document)
    }

    /// Commits a pending document as the entry's active document.
    pub fn commit_navigation(&mut self, entry_id: NavigationEntryId, document: DocumentId) -> Result<()> {
        self.slots.commit(entry_id, document)
    }

    /// Drops a speculative or pending document.
    pub fn discard_speculative(&mut self, entry_id: NavigationEntryId, document: DocumentId) -> Result<()> {
        self.slots.discard(entry_id, document)
    }

    /// Lifecycle state of a tracked document.
    pub fn document_state(&self, entry_id: NavigationEntryId, document: DocumentId) -> Option<LifecycleState> {
        self.slots.state_of(entry_id, document)
    }

    // =========================================================================
    // Host signals and timers
    // =========================================================================

    /// Applies a signal from a document host or the process manager.
    pub fn handle_signal(&mut self, signal: HostSignal, now: Instant) -> CacheEffects {
        debug!(signal = signal.kind(), "host signal");
        match &signal {
            HostSignal::ActivationAcknowledged { token } => {
                let mut effects = CacheEffects::default();
                match self.commit_restore(*token, now) {
                    Ok(page) => effects.restored.push(page),
                    Err(e) => warn!(%token, error = %e, "activation acknowledgement ignored"),
                }
                return effects;
            }
            HostSignal::Disqualified {
                document,
                event: DisqualifyingEvent::DisableCaching { detail },
            } if self.store.entry_for_document(*document).is_none() => {
                if self.slots.is_active(*document) {
                    // Applies when the page is next stored.
                    self.eligibility.disable_document(*document, detail.clone());
                } else {
                    trace!(%document, "disable caching for inactive document ignored");
                }
                return CacheEffects::default();
            }
            _ => {}
        }

        let evicted = self
            .scheduler
            .handle(&signal, &mut self.store, &mut self.placement);
        let effects = self.finish(evicted);
        self.scheduler.rearm(&self.store);
        effects
    }

    /// Evicts entries whose deadline has passed.
    pub fn run_timers(&mut self, now: Instant) -> CacheEffects {
        let evicted = self
            .scheduler
            .fire(&mut self.store, &mut self.placement, now);
        let effects = self.finish(evicted);
        self.scheduler.rearm(&self.store);
        effects
    }

    /// Earliest time [`BackForwardCache::run_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.armed()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Changes the entry lifetime; existing entries use the new value.
    pub fn set_time_to_live(&mut self, time_to_live: Duration) -> Result<()> {
        self.scheduler.set_time_to_live(time_to_live)?;
        self.scheduler.rearm(&self.store);
        Ok(())
    }

    /// Changes the caps and prunes to them.
    pub fn set_capacity(&mut self, global: usize, foreground: usize) -> Result<CacheEffects> {
        let limits = CapacityLimits::new(global, foreground)?;
        info!(global, foreground, "cache capacity changed");
        let evicted = self.store.set_limits(limits, &mut self.placement);
        let effects = self.finish(evicted);
        self.scheduler.rearm(&self.store);
        Ok(effects)
    }

    /// Replaces the allow and block lists. Cached entries are kept.
    pub fn set_domain_policy(&mut self, allowed: Vec<UrlPattern>, blocked: Vec<UrlPattern>) {
        self.eligibility.set_websites(allowed, blocked);
    }

    /// Replaces the blocked query parameters. Cached entries are kept.
    pub fn set_blocked_query_parameters(&mut self, params: Vec<QueryParam>) {
        self.eligibility.set_blocked_params(params);
    }

    /// Records whether the embedder can host cached pages.
    pub fn set_delegate_supported(&mut self, supported: bool) {
        self.eligibility.set_delegate_supported(supported);
    }

    /// Switches caching on or off. Switching off flushes the cache.
    pub fn set_enabled(&mut self, enabled: bool) -> CacheEffects {
        self.eligibility.set_enabled(enabled);
        if enabled {
            CacheEffects::default()
        } else {
            self.flush()
        }
    }

    /// Evicts every entry.
    pub fn flush(&mut self) -> CacheEffects {
        let evicted = self.store.flush(&mut self.placement);
        if !evicted.is_empty() {
            info!(entries = evicted.len(), "cache flushed");
        }
        let effects = self.finish(evicted);
        self.scheduler.rearm(&self.store);
        effects
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns true if `url` passes the domain policy.
    pub fn is_allowed(&self, url: &Url) -> bool {
        self.eligibility.is_allowed(url)
    }

    /// Returns true if a live entry exists for `entry_id`.
    pub fn contains(&self, entry_id: NavigationEntryId) -> bool {
        self.store.contains(entry_id)
    }

    /// Live entries, oldest first.
    pub fn entries(&self, now: Instant) -> Vec<EntrySnapshot> {
        let ttl = self.scheduler.time_to_live();
        self.store
            .iter()
            .map(|entry| {
                let foreground = self.store.is_foreground(entry, &self.placement);
                entry.snapshot(foreground, now, ttl)
            })
            .collect()
    }

    /// Why `entry_id` cannot be restored, or `None` if it can.
    pub fn not_restored_reason(&self, entry_id: NavigationEntryId) -> Option<NotRestoredReason> {
        if self.store.contains(entry_id) {
            return None;
        }
        Some(
            self.history
                .get(entry_id)
                .cloned()
                .unwrap_or(NotRestoredReason::NotInCache),
        )
    }

    /// State of a restore attempt.
    pub fn restore_state(&self, token: RestoreToken) -> Option<RestoreState> {
        self.restorer.state(token)
    }

    /// In-flight restore attempt for `entry_id`.
    pub fn restore_token_for(&self, entry_id: NavigationEntryId) -> Option<RestoreToken> {
        self.restorer.attempt_for(entry_id)
    }

    /// Current capacity limits.
    pub fn limits(&self) -> CapacityLimits {
        self.store.limits()
    }

    /// Current entry lifetime.
    pub fn time_to_live(&self) -> Duration {
        self.scheduler.time_to_live()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of foreground-classified entries.
    pub fn foreground_len(&self) -> usize {
        self.store.foreground_len(&self.placement)
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn evict(&mut self, entry_id: NavigationEntryId, reason: EvictionReason) -> CacheEffects {
        let evicted: Vec<_> = self
            .store
            .remove(entry_id, reason, &mut self.placement)
            .into_iter()
            .collect();
        let effects = self.finish(evicted);
        self.scheduler.rearm(&self.store);
        effects
    }

    fn finish(&mut self, evicted: Vec<Eviction>) -> CacheEffects {
        let mut effects = CacheEffects::default();
        for eviction in evicted {
            let reason = eviction.reason.as_str();
            debug!(entry_id = %eviction.entry_id, reason = %eviction.reason, "entry evicted");

            self.slots.vacate(eviction.entry_id, eviction.main_document);
            self.history.record(
                eviction.entry_id,
                NotRestoredReason::Evicted(eviction.reason.clone()),
            );
            self.stats.record_eviction();
            metrics().record_eviction(reason);

            if let Some(fresh) = self.restorer.on_evicted(eviction.entry_id, &eviction.reason) {
                info!(token = %fresh.token, entry_id = %fresh.entry_id, reason, "restore aborted, reissuing navigation");
                self.stats.record_reissue();
                metrics().record_reissue(reason);
                effects.reissued.push(fresh);
            }
            effects.evicted.push(eviction);
        }
        self.update_gauges();
        effects
    }

    fn settled_error(&self, token: RestoreToken) -> CacheError {
        match self.restorer.state(token) {
            Some(RestoreState::Aborted) => CacheError::RestoreAborted(token),
            _ => CacheError::UnknownRestore(token),
        }
    }

    fn update_gauges(&self) {
        metrics().set_cache_size(self.store.len(), self.foreground_len());
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    stores: AtomicU64,
    rejections: AtomicU64,
    evictions: AtomicU64,
    restores: AtomicU64,
    not_restored: AtomicU64,
    reissues: AtomicU64,
}

impl CacheStats {
    fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    fn record_not_restored(&self) {
        self.not_restored.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reissue(&self) {
        self.reissues.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn restores(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }

    pub fn not_restored(&self) -> u64 {
        self.not_restored.load(Ordering::Relaxed)
    }

    pub fn reissues(&self) -> u64 {
        self.reissues.load(Ordering::Relaxed)
    }

    /// Share of history navigations served from the cache.
    pub fn restore_rate(&self) -> f64 {
        let restores = self.restores();
        let total = restores + self.not_restored() + self.reissues();
        if total == 0 {
            0.0
        } else {
            restores as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: u64, process: u32, url: &str) -> Page {
        Page::new(
            NavigationEntryId(id),
            DomainGroupId(id),
            DocumentInstance::new(DocumentId(id), ProcessId(process), Url::parse(url).unwrap()),
        )
    }

    fn cache() -> BackForwardCache {
        BackForwardCache::new(CacheConfig {
            freeze_timeout: Duration::ZERO,
            ..CacheConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config() {
        let config = CacheConfig {
            cache_size: 1,
            foreground_cache_size: 2,
            ..CacheConfig::default()
        };
        assert!(BackForwardCache::new(config).is_err());

        let config = CacheConfig {
            time_to_live: Duration::ZERO,
            ..CacheConfig::default()
        };
        assert_eq!(
            BackForwardCache::new(config).err(),
            Some(CacheError::ZeroTimeToLive)
        );
    }

    #[test]
    fn test_store_and_restore() {
        let mut cache = cache();
        let now = Instant::now();

        assert!(cache.store_page(page(1, 1, "https://a.com/"), now).unwrap().is_stored());
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.document_state(NavigationEntryId(1), DocumentId(1)),
            Some(LifecycleState::InBackForwardCache)
        );
        assert_eq!(cache.not_restored_reason(NavigationEntryId(1)), None);

        let RestoreStart::Requested(token) = cache
            .begin_restore(NavigationEntryId(1), ActivationContext::default(), now)
            .unwrap()
        else {
            panic!("expected restore to start");
        };
        let ActivationCheck::Ready { documents, .. } = cache.check_activation(token).unwrap() else {
            panic!("expected checks to pass");
        };
        assert_eq!(documents, vec![DocumentId(1)]);

        let effects = cache.handle_signal(HostSignal::ActivationAcknowledged { token }, now);
        assert_eq!(effects.restored.len(), 1);
        assert_eq!(effects.restored[0].url.as_str(), "https://a.com/");
        assert!(cache.is_empty());
        assert_eq!(
            cache.document_state(NavigationEntryId(1), DocumentId(1)),
            Some(LifecycleState::Active)
        );
        assert_eq!(cache.stats().restores(), 1);
        assert_eq!(cache.restore_state(token), Some(RestoreState::Committed));
    }

    #[test]
    fn test_rejected_page_reason_is_remembered() {
        let mut cache = cache();
        let now = Instant::now();

        let outcome = cache.store_page(page(1, 1, "https://a.com/").with_status(500), now).unwrap();
        assert_eq!(
            outcome,
            StoreOutcome::Rejected {
                entry_id: NavigationEntryId(1),
                reasons: IneligibleReasons::from_vec(vec![IneligibleReason::HttpStatusNotOk {
                    status: 500
                }]),
            }
        );

        let start = cache
            .begin_restore(NavigationEntryId(1), ActivationContext::default(), now)
            .unwrap();
        assert!(matches!(
            start,
            RestoreStart::NotRestored(NotRestoredReason::Ineligible(_))
        ));
        assert_eq!(cache.stats().rejections(), 1);
        assert_eq!(cache.stats().not_restored(), 1);
        assert_eq!(
            cache.not_restored_reason(NavigationEntryId(2)),
            Some(NotRestoredReason::NotInCache)
        );
    }

    #[test]
    fn test_duplicate_store_supersedes() {
        let mut cache = cache();
        let now = Instant::now();

        cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();
        let mut replacement = page(1, 2, "https://a.com/again");
        replacement.main = DocumentInstance::new(
            DocumentId(9),
            ProcessId(2),
            Url::parse("https://a.com/again").unwrap(),
        );
        let StoreOutcome::Stored { effects, .. } = cache.store_page(replacement, now).unwrap() else {
            panic!("expected store");
        };

        assert_eq!(effects.evicted.len(), 1);
        assert_eq!(effects.evicted[0].reason, EvictionReason::Superseded);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries(now)[0].url, "https://a.com/again");
    }

    #[test]
    fn test_disable_caching_before_store() {
        let mut cache = cache();
        let now = Instant::now();

        cache
            .activate_document(NavigationEntryId(1), DocumentId(1))
            .unwrap();
        cache.handle_signal(
            HostSignal::Disqualified {
                document: DocumentId(1),
                event: DisqualifyingEvent::DisableCaching {
                    detail: "feature".into(),
                },
            },
            now,
        );
        let outcome = cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();
        assert!(!outcome.is_stored());

        // The opt-out is consumed by the store attempt.
        assert!(cache.store_page(page(1, 1, "https://a.com/"), now).unwrap().is_stored());
    }

    #[test]
    fn test_disable_caching_after_eviction_is_noop() {
        let mut cache = cache();
        let now = Instant::now();
        cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();

        let effects = cache.handle_signal(
            HostSignal::Disqualified {
                document: DocumentId(1),
                event: DisqualifyingEvent::ScriptExecuted,
            },
            now,
        );
        assert_eq!(effects.evicted_ids(), vec![NavigationEntryId(1)]);

        for _ in 0..2 {
            let effects = cache.handle_signal(
                HostSignal::Disqualified {
                    document: DocumentId(1),
                    event: DisqualifyingEvent::DisableCaching {
                        detail: "late".into(),
                    },
                },
                now,
            );
            assert!(effects.is_empty());
        }
        assert!(!cache.eligibility.is_disabled(DocumentId(1)));
        assert_eq!(
            cache.not_restored_reason(NavigationEntryId(1)),
            Some(NotRestoredReason::Evicted(EvictionReason::JavaScriptExecution))
        );
    }

    #[test]
    fn test_activation_check_failure_reissues() {
        let mut cache = cache();
        let now = Instant::now();
        cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();

        let context = ActivationContext {
            current_domain_group: Some(DomainGroupId(1)),
            ..Default::default()
        };
        let RestoreStart::Requested(token) = cache
            .begin_restore(NavigationEntryId(1), context, now)
            .unwrap()
        else {
            panic!("expected restore to start");
        };
        let ActivationCheck::Failed(effects) = cache.check_activation(token).unwrap() else {
            panic!("expected check failure");
        };

        assert_eq!(effects.reissued.len(), 1);
        assert_eq!(
            effects.reissued[0].reason,
            EvictionReason::BrowsingInstanceNotSwapped
        );
        assert_eq!(
            cache.check_activation(token).unwrap_err(),
            CacheError::RestoreAborted(token)
        );
    }

    #[test]
    fn test_cancel_restore_does_not_reissue() {
        let mut cache = cache();
        let now = Instant::now();
        cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();

        let RestoreStart::Requested(token) = cache
            .begin_restore(NavigationEntryId(1), ActivationContext::default(), now)
            .unwrap()
        else {
            panic!("expected restore to start");
        };
        let effects = cache.cancel_restore(token).unwrap();
        assert!(effects.reissued.is_empty());
        assert_eq!(
            effects.evicted[0].reason,
            EvictionReason::NavigationCancelledWhileRestoring
        );
        assert_eq!(
            cache.not_restored_reason(NavigationEntryId(1)),
            Some(NotRestoredReason::Evicted(
                EvictionReason::NavigationCancelledWhileRestoring
            ))
        );
    }

    #[test]
    fn test_disable_flushes() {
        let mut cache = cache();
        let now = Instant::now();
        cache.store_page(page(1, 1, "https://a.com/"), now).unwrap();

        let effects = cache.set_enabled(false);
        assert_eq!(effects.evicted_ids(), vec![NavigationEntryId(1)]);
        assert!(!cache.store_page(page(2, 1, "https://a.com/"), now).unwrap().is_stored());
    }

    #[test]
    fn test_set_capacity_prunes() {
        let mut cache = cache();
        let now = Instant::now();
        for id in 1..=4 {
            cache.store_page(page(id, id as u32, "https://a.com/"), now).unwrap();
        }

        let effects = cache.set_capacity(2, 1).unwrap();
        assert_eq!(
            effects.evicted_ids(),
            vec![NavigationEntryId(1), NavigationEntryId(2)]
        );
        assert!(cache.set_capacity(1, 2).is_err());
        assert_eq!(cache.limits(), CapacityLimits::new(2, 1).unwrap());
    }

    #[test]
    fn test_stats_restore_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.restore_rate(), 0.0);
        stats.record_restore();
        stats.record_not_restored();
        assert!((stats.restore_rate() - 0.5).abs() < f64::EPSILON);
    }
}
