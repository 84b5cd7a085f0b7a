//! Behavioral tests for the back/forward cache.
//!
//! These tests drive [`BackForwardCache`] through whole navigation
//! histories with an explicit clock:
//! - FIFO capacity pruning
//! - Foreground reclassification
//! - Expiry and freeze grace periods
//! - Restore races against eviction
//! - Capacity invariants under random workloads

use std::time::{Duration, Instant};

use proptest::prelude::*;
use url::Url;

use rewind_cache::{
    ActivationCheck, ActivationContext, BackForwardCache, CacheConfig, DisqualifyingEvent,
    DocumentId, DocumentInstance, DomainGroupId, EvictionReason, HostSignal, LifecycleState,
    NavigationEntryId, NotRestoredReason, Page, ProcessId, RestoreStart, RestoreState,
    RestoreToken, StoreOutcome,
};

// ============================================================================
// Test Helpers
// ============================================================================

struct History {
    cache: BackForwardCache,
    start: Instant,
}

impl History {
    fn new(config: CacheConfig) -> Self {
        Self {
            cache: BackForwardCache::new(config).unwrap(),
            start: Instant::now(),
        }
    }

    fn with_capacity(global: usize, foreground: usize) -> Self {
        Self::new(CacheConfig {
            cache_size: global,
            foreground_cache_size: foreground,
            freeze_timeout: Duration::ZERO,
            ..CacheConfig::default()
        })
    }

    fn at(&self, offset: Duration) -> Instant {
        self.start + offset
    }

    /// Navigates away from a page with one document in `process`.
    fn leave(&mut self, id: u64, process: u32) -> StoreOutcome {
        self.leave_at(id, process, Duration::ZERO)
    }

    fn leave_at(&mut self, id: u64, process: u32, offset: Duration) -> StoreOutcome {
        let url = Url::parse(&format!("https://a.com/page{id}")).unwrap();
        let page = Page::new(
            NavigationEntryId(id),
            DomainGroupId(id),
            DocumentInstance::new(DocumentId(id), ProcessId(process), url),
        );
        let now = self.at(offset);
        self.cache.store_page(page, now).unwrap()
    }

    fn cached(&self) -> Vec<u64> {
        self.cache
            .entries(self.start)
            .iter()
            .map(|entry| entry.entry_id.get())
            .collect()
    }

    fn foreground(&mut self, process: u32) -> Vec<(u64, EvictionReason)> {
        let effects = self.cache.handle_signal(
            HostSignal::ProcessPlacementChanged {
                process: ProcessId(process),
                foregrounded: true,
            },
            self.start,
        );
        effects
            .evicted
            .into_iter()
            .map(|eviction| (eviction.entry_id.get(), eviction.reason))
            .collect()
    }

    fn start_restore(&mut self, id: u64) -> RestoreToken {
        match self
            .cache
            .begin_restore(NavigationEntryId(id), ActivationContext::default(), self.start)
            .unwrap()
        {
            RestoreStart::Requested(token) => token,
            RestoreStart::NotRestored(reason) => panic!("entry {id} not cached: {reason}"),
        }
    }
}

fn evicted(outcome: &StoreOutcome) -> Vec<(u64, EvictionReason)> {
    match outcome {
        StoreOutcome::Stored { effects, .. } => effects
            .evicted
            .iter()
            .map(|eviction| (eviction.entry_id.get(), eviction.reason.clone()))
            .collect(),
        StoreOutcome::Rejected { .. } => Vec::new(),
    }
}

// ============================================================================
// Capacity
// ============================================================================

#[test]
fn test_fifo_eviction_after_capacity() {
    let n = 3;
    let mut history = History::with_capacity(n, 1);

    let mut order = Vec::new();
    for id in 1..=(2 * n as u64 + 1) {
        let outcome = history.leave(id, id as u32);
        order.extend(evicted(&outcome));
    }

    assert_eq!(
        order,
        (1..=4)
            .map(|id| (id, EvictionReason::CacheLimit))
            .collect::<Vec<_>>()
    );
    assert_eq!(history.cached(), vec![5, 6, 7]);
}

#[test]
fn test_change_to_foreground_evicts_eldest_foreground_entry() {
    let mut history = History::with_capacity(4, 2);
    for id in 0..4 {
        history.leave(id, 100 + id as u32);
    }

    assert!(history.foreground(101).is_empty());
    assert!(history.foreground(102).is_empty());
    assert_eq!(
        history.foreground(103),
        vec![(1, EvictionReason::ForegroundCacheLimit)]
    );
    assert_eq!(history.cached(), vec![0, 2, 3]);
    assert_eq!(history.cache.foreground_len(), 2);
}

#[test]
fn test_foreground_evictions_leave_room_for_background() {
    let mut history = History::with_capacity(2, 1);
    history.foreground(2);
    history.foreground(3);

    history.leave(1, 1);
    history.leave(2, 2);
    let outcome = history.leave(3, 3);

    assert_eq!(
        evicted(&outcome),
        vec![(2, EvictionReason::ForegroundCacheLimit)]
    );
    assert_eq!(history.cached(), vec![1, 3]);
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "cached twice"))]
fn test_one_entry_per_navigation_entry() {
    let mut history = History::with_capacity(4, 2);
    history.leave(1, 1);
    let outcome = history.leave(1, 2);

    assert_eq!(evicted(&outcome), vec![(1, EvictionReason::Superseded)]);
    assert_eq!(history.cached(), vec![1]);
    assert_eq!(
        history
            .cache
            .document_state(NavigationEntryId(1), DocumentId(1)),
        Some(LifecycleState::InBackForwardCache)
    );
}

// ============================================================================
// Time
// ============================================================================

#[test]
fn test_entry_expires_exactly_at_time_to_live() {
    let mut history = History::with_capacity(4, 2);
    let ttl = history.cache.time_to_live();
    assert_eq!(ttl, Duration::from_secs(3600));

    history.leave(1, 1);
    assert_eq!(history.cache.next_deadline(), Some(history.at(ttl)));

    let early = history
        .cache
        .run_timers(history.at(ttl - Duration::from_millis(1)));
    assert!(early.is_empty());
    assert_eq!(history.cached(), vec![1]);

    let due = history.cache.run_timers(history.at(ttl));
    assert_eq!(due.evicted[0].reason, EvictionReason::Timeout);
    assert_eq!(
        history.cache.not_restored_reason(NavigationEntryId(1)),
        Some(NotRestoredReason::Evicted(EvictionReason::Timeout))
    );
    assert_eq!(history.cache.next_deadline(), None);
}

#[test]
fn test_time_to_live_change_applies_to_cached_entries() {
    let mut history = History::with_capacity(4, 2);
    history.leave(1, 1);
    history.leave_at(2, 2, Duration::from_secs(30));

    history.cache.set_time_to_live(Duration::from_secs(60)).unwrap();
    assert_eq!(
        history.cache.next_deadline(),
        Some(history.at(Duration::from_secs(60)))
    );

    let due = history.cache.run_timers(history.at(Duration::from_secs(60)));
    assert_eq!(due.evicted_ids(), vec![NavigationEntryId(1)]);
    assert_eq!(history.cached(), vec![2]);
}

#[test]
fn test_timeout_putting_in_cache() {
    let mut history = History::new(CacheConfig {
        freeze_timeout: Duration::from_millis(3000),
        ..CacheConfig::default()
    });
    history.leave(1, 1);
    history.leave(2, 2);
    history.cache.handle_signal(
        HostSignal::FreezeAcknowledged {
            document: DocumentId(2),
        },
        history.start,
    );

    assert_eq!(
        history.cache.next_deadline(),
        Some(history.at(Duration::from_millis(3000)))
    );
    let due = history.cache.run_timers(history.at(Duration::from_millis(3000)));
    assert_eq!(due.evicted_ids(), vec![NavigationEntryId(1)]);
    assert_eq!(due.evicted[0].reason, EvictionReason::TimeoutPuttingInCache);
    assert_eq!(history.cached(), vec![2]);
}

// ============================================================================
// Restoration
// ============================================================================

#[test]
fn test_eviction_wins_over_pending_restore() {
    let mut history = History::with_capacity(4, 2);
    history.leave(1, 7);

    let token = history.start_restore(1);
    assert!(matches!(
        history.cache.check_activation(token).unwrap(),
        ActivationCheck::Ready { .. }
    ));

    let crash = history.cache.handle_signal(
        HostSignal::ProcessTerminated {
            process: ProcessId(7),
        },
        history.start,
    );
    assert_eq!(crash.reissued.len(), 1);
    assert_eq!(crash.reissued[0].token, token);
    assert_eq!(
        crash.reissued[0].reason,
        EvictionReason::RendererProcessKilled
    );

    // A late acknowledgement neither restores nor reissues again.
    let late = history
        .cache
        .handle_signal(HostSignal::ActivationAcknowledged { token }, history.start);
    assert!(late.is_empty());
    assert_eq!(history.cache.restore_state(token), Some(RestoreState::Aborted));
    assert_eq!(history.cache.stats().reissues(), 1);
}

#[test]
fn test_disqualified_during_restore_request() {
    let mut history = History::with_capacity(4, 2);
    history.leave(1, 1);
    let token = history.start_restore(1);

    let effects = history.cache.handle_signal(
        HostSignal::Disqualified {
            document: DocumentId(1),
            event: DisqualifyingEvent::ActivationDisallowed { reason: 12 },
        },
        history.start,
    );
    assert_eq!(
        effects.reissued[0].reason,
        EvictionReason::IgnoreEventAndEvict {
            disallow_activation_reason: 12
        }
    );
    assert!(history.cache.check_activation(token).is_err());
}

#[test]
fn test_restore_after_restore_is_not_cached() {
    let mut history = History::with_capacity(4, 2);
    history.leave(1, 1);
    let token = history.start_restore(1);
    history.cache.check_activation(token).unwrap();
    history.cache.commit_restore(token, history.start).unwrap();

    assert_eq!(
        history
            .cache
            .begin_restore(NavigationEntryId(1), ActivationContext::default(), history.start)
            .unwrap(),
        RestoreStart::NotRestored(NotRestoredReason::NotInCache)
    );

    // The restored page can be cached again when the user leaves it.
    assert!(history.leave(1, 1).is_stored());
}

#[test]
fn test_speculative_document_waits_for_eviction() {
    let mut history = History::with_capacity(4, 2);
    let entry = NavigationEntryId(1);
    history.leave(1, 1);

    history.cache.add_speculative(entry, DocumentId(50));
    history.cache.ready_to_commit(entry, DocumentId(50)).unwrap();
    assert!(history.cache.commit_navigation(entry, DocumentId(50)).is_err());

    history.cache.flush();
    history.cache.commit_navigation(entry, DocumentId(50)).unwrap();
    assert_eq!(
        history.cache.document_state(entry, DocumentId(50)),
        Some(LifecycleState::Active)
    );
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Leave { id: u64, process: u32 },
    Placement { process: u32, foregrounded: bool },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..32, 0u32..6).prop_map(|(id, process)| Op::Leave { id, process }),
        (0u32..6, any::<bool>()).prop_map(|(process, foregrounded)| Op::Placement {
            process,
            foregrounded
        }),
    ]
}

proptest! {
    #[test]
    fn prop_capacity_limits_hold(
        global in 1usize..6,
        foreground_offset in 0usize..6,
        ops in prop::collection::vec(op(), 1..64),
    ) {
        let foreground = foreground_offset.min(global);
        let mut history = History::with_capacity(global, foreground);

        for op in ops {
            match op {
                Op::Leave { id, process } => {
                    // Each navigation entry is cached at most once.
                    if !history.cache.contains(NavigationEntryId(id)) {
                        history.leave(id, process);
                    }
                }
                Op::Placement { process, foregrounded } => {
                    history.cache.handle_signal(
                        HostSignal::ProcessPlacementChanged {
                            process: ProcessId(process),
                            foregrounded,
                        },
                        history.start,
                    );
                }
            }
            prop_assert!(history.cache.len() <= global);
            prop_assert!(history.cache.foreground_len() <= foreground);
        }
    }
}
