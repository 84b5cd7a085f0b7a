//! Restoration attempts.
//!
//! An attempt moves `Requested -> PendingActivationChecks -> Committed`, or
//! ends `Aborted`. If the entry is evicted before commit the eviction wins:
//! the attempt aborts and exactly one [`FreshNavigation`] is produced so the
//! navigation can be reissued without the cache.

use compact_str::CompactString;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;
use tracing::{debug, trace};
use url::Url;

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::ids::{DomainGroupId, NavigationEntryId, RestoreToken};
use crate::reason::EvictionReason;

/// Settled attempts remembered for [`RestorationCoordinator::state`].
const SETTLED_HISTORY: usize = 64;

/// State of one restoration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    /// The navigation asked for the entry.
    Requested,
    /// Pre-activation checks passed; waiting for the host to activate.
    PendingActivationChecks,
    /// Documents are active again.
    Committed,
    /// The attempt was abandoned.
    Aborted,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::PendingActivationChecks => "pending_activation_checks",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}

/// State of the tab a page is being restored into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationContext {
    /// Domain group of the page currently shown.
    pub current_domain_group: Option<DomainGroupId>,
    /// Domain groups of other live pages.
    pub live_domain_groups: Vec<DomainGroupId>,
    /// User agent override currently in effect.
    pub user_agent_override: Option<CompactString>,
}

impl ActivationContext {
    /// Returns the reason `entry` cannot be activated in this context.
    pub fn check(&self, entry: &CacheEntry) -> Option<EvictionReason> {
        if entry.user_agent_override() != self.user_agent_override.as_deref() {
            return Some(EvictionReason::UserAgentOverrideDiffers);
        }
        if self.live_domain_groups.contains(&entry.domain_group()) {
            return Some(EvictionReason::ConflictingBrowsingInstance);
        }
        if self.current_domain_group == Some(entry.domain_group()) {
            return Some(EvictionReason::BrowsingInstanceNotSwapped);
        }
        None
    }
}

/// A navigation to reissue without the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshNavigation {
    /// Aborted attempt.
    pub token: RestoreToken,
    /// Navigation entry.
    pub entry_id: NavigationEntryId,
    /// URL to load.
    pub url: Url,
    /// Eviction that aborted the attempt.
    pub reason: EvictionReason,
}

/// One in-flight attempt.
#[derive(Debug, Clone)]
pub struct RestoreAttempt {
    /// Token.
    pub token: RestoreToken,
    /// Navigation entry.
    pub entry_id: NavigationEntryId,
    /// URL being restored.
    pub url: Url,
    /// Current state.
    pub state: RestoreState,
    /// Activation context.
    pub context: ActivationContext,
    /// Request time.
    pub requested_at: Instant,
}

/// Tracks restoration attempts.
#[derive(Debug, Default)]
pub struct RestorationCoordinator {
    attempts: HashMap<RestoreToken, RestoreAttempt>,
    by_entry: HashMap<NavigationEntryId, RestoreToken>,
    settled: VecDeque<(RestoreToken, RestoreState)>,
    next_token: u64,
}

impl RestorationCoordinator {
    /// Creates an idle coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an attempt for `entry`.
    pub fn begin(
        &mut self,
        entry: &CacheEntry,
        context: ActivationContext,
        now: Instant,
    ) -> Result<RestoreToken> {
        let entry_id = entry.entry_id();
        if self.by_entry.contains_key(&entry_id) {
            return Err(CacheError::RestoreInProgress(entry_id));
        }

        self.next_token += 1;
        let token = RestoreToken(self.next_token);
        self.attempts.insert(
            token,
            RestoreAttempt {
                token,
                entry_id,
                url: entry.url().clone(),
                state: RestoreState::Requested,
                context,
                requested_at: now,
            },
        );
        self.by_entry.insert(entry_id, token);
        debug!(%token, %entry_id, "restore requested");
        Ok(token)
    }

    /// Looks up an in-flight attempt.
    pub fn attempt(&self, token: RestoreToken) -> Option<&RestoreAttempt> {
        self.attempts.get(&token)
    }

    /// Returns the in-flight attempt for `entry_id`.
    pub fn attempt_for(&self, entry_id: NavigationEntryId) -> Option<RestoreToken> {
        self.by_entry.get(&entry_id).copied()
    }

    /// State of an attempt, in flight or recently settled.
    pub fn state(&self, token: RestoreToken) -> Option<RestoreState> {
        self.attempts.get(&token).map(|attempt| attempt.state).or_else(|| {
            self.settled
                .iter()
                .rev()
                .find(|(settled, _)| *settled == token)
                .map(|(_, state)| *state)
        })
    }

    /// Number of attempts in flight.
    pub fn pending(&self) -> usize {
        self.attempts.len()
    }

    /// Marks the activation checks of `token` passed.
    pub fn checks_passed(&mut self, token: RestoreToken) -> Result<&RestoreAttempt> {
        let attempt = self.expect_state(token, RestoreState::Requested)?;
        attempt.state = RestoreState::PendingActivationChecks;
        trace!(%token, "activation checks passed");
        Ok(&*attempt)
    }

    /// Commits an attempt whose checks passed.
    pub fn commit(&mut self, token: RestoreToken) -> Result<RestoreAttempt> {
        self.expect_state(token, RestoreState::PendingActivationChecks)?;
        let mut attempt = self.settle(token, RestoreState::Committed)?;
        attempt.state = RestoreState::Committed;
        debug!(%token, entry_id = %attempt.entry_id, "restore committed");
        Ok(attempt)
    }

    /// Abandons an attempt without reissuing it.
    pub fn cancel(&mut self, token: RestoreToken) -> Result<RestoreAttempt> {
        let mut attempt = self.settle(token, RestoreState::Aborted)?;
        attempt.state = RestoreState::Aborted;
        debug!(%token, entry_id = %attempt.entry_id, "restore cancelled");
        Ok(attempt)
    }

    /// Aborts the attempt on `entry_id`, if any, because it was evicted.
    ///
    /// Returns the navigation to reissue. A second call for the same attempt
    /// returns `None`.
    pub fn on_evicted(
        &mut self,
        entry_id: NavigationEntryId,
        reason: &EvictionReason,
    ) -> Option<FreshNavigation> {
        let token = self.by_entry.get(&entry_id).copied()?;
        let attempt = self.settle(token, RestoreState::Aborted).ok()?;
        debug!(%token, %entry_id, %reason, "restore aborted by eviction");
        Some(FreshNavigation {
            token,
            entry_id,
            url: attempt.url,
            reason: reason.clone(),
        })
    }

    fn expect_state(
        &mut self,
        token: RestoreToken,
        expected: RestoreState,
    ) -> Result<&mut RestoreAttempt> {
        let settled = self.state(token);
        match self.attempts.get_mut(&token) {
            Some(attempt) if attempt.state == expected => Ok(attempt),
            Some(attempt) => Err(CacheError::RestoreOutOfOrder {
                token,
                state: attempt.state,
                expected,
            }),
            None if settled == Some(RestoreState::Aborted) => Err(CacheError::RestoreAborted(token)),
            None => Err(CacheError::UnknownRestore(token)),
        }
    }

    fn settle(&mut self, token: RestoreToken, state: RestoreState) -> Result<RestoreAttempt> {
        let Some(attempt) = self.attempts.remove(&token) else {
            return Err(match self.state(token) {
                Some(RestoreState::Aborted) => CacheError::RestoreAborted(token),
                _ => CacheError::UnknownRestore(token),
            });
        };
        self.by_entry.remove(&attempt.entry_id);
        if self.settled.len() == SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back((token, state));
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentInstance, Page};
    use crate::ids::{DocumentId, ProcessId};
    use std::time::Duration;

    fn entry(id: u64, group: u64) -> CacheEntry {
        let page = Page::new(
            NavigationEntryId(id),
            DomainGroupId(group),
            DocumentInstance::new(
                DocumentId(id),
                ProcessId(1),
                Url::parse("https://a.com/").unwrap(),
            ),
        );
        CacheEntry::new(page, id, Instant::now(), Duration::ZERO).unwrap()
    }

    #[test]
    fn test_happy_path() {
        let mut coordinator = RestorationCoordinator::new();
        let token = coordinator
            .begin(&entry(1, 1), ActivationContext::default(), Instant::now())
            .unwrap();
        assert_eq!(coordinator.state(token), Some(RestoreState::Requested));

        coordinator.checks_passed(token).unwrap();
        assert_eq!(
            coordinator.state(token),
            Some(RestoreState::PendingActivationChecks)
        );

        let attempt = coordinator.commit(token).unwrap();
        assert_eq!(attempt.state, RestoreState::Committed);
        assert_eq!(coordinator.state(token), Some(RestoreState::Committed));
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_commit_requires_checks() {
        let mut coordinator = RestorationCoordinator::new();
        let token = coordinator
            .begin(&entry(1, 1), ActivationContext::default(), Instant::now())
            .unwrap();
        assert!(matches!(
            coordinator.commit(token),
            Err(CacheError::RestoreOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_one_attempt_per_entry() {
        let mut coordinator = RestorationCoordinator::new();
        let e = entry(1, 1);
        coordinator
            .begin(&e, ActivationContext::default(), Instant::now())
            .unwrap();
        assert_eq!(
            coordinator
                .begin(&e, ActivationContext::default(), Instant::now())
                .unwrap_err(),
            CacheError::RestoreInProgress(NavigationEntryId(1))
        );
    }

    #[test]
    fn test_eviction_wins_once() {
        let mut coordinator = RestorationCoordinator::new();
        let token = coordinator
            .begin(&entry(1, 1), ActivationContext::default(), Instant::now())
            .unwrap();
        coordinator.checks_passed(token).unwrap();

        let fresh = coordinator
            .on_evicted(NavigationEntryId(1), &EvictionReason::Flushed)
            .unwrap();
        assert_eq!(fresh.token, token);
        assert_eq!(fresh.reason, EvictionReason::Flushed);
        assert_eq!(fresh.url.as_str(), "https://a.com/");

        assert!(coordinator
            .on_evicted(NavigationEntryId(1), &EvictionReason::Flushed)
            .is_none());
        assert_eq!(
            coordinator.commit(token).unwrap_err(),
            CacheError::RestoreAborted(token)
        );
        assert_eq!(coordinator.state(token), Some(RestoreState::Aborted));
    }

    #[test]
    fn test_cancel() {
        let mut coordinator = RestorationCoordinator::new();
        let token = coordinator
            .begin(&entry(1, 1), ActivationContext::default(), Instant::now())
            .unwrap();
        coordinator.cancel(token).unwrap();
        assert!(coordinator
            .on_evicted(NavigationEntryId(1), &EvictionReason::Timeout)
            .is_none());
        assert_eq!(
            coordinator.cancel(token).unwrap_err(),
            CacheError::RestoreAborted(token)
        );
        assert_eq!(
            coordinator.cancel(RestoreToken(99)).unwrap_err(),
            CacheError::UnknownRestore(RestoreToken(99))
        );
    }

    #[test]
    fn test_activation_checks() {
        let e = entry(1, 5);
        assert_eq!(ActivationContext::default().check(&e), None);

        let ua = ActivationContext {
            user_agent_override: Some("mobile".into()),
            ..Default::default()
        };
        assert_eq!(ua.check(&e), Some(EvictionReason::UserAgentOverrideDiffers));

        let conflicting = ActivationContext {
            live_domain_groups: vec![DomainGroupId(5)],
            ..Default::default()
        };
        assert_eq!(
            conflicting.check(&e),
            Some(EvictionReason::ConflictingBrowsingInstance)
        );

        let same_group = ActivationContext {
            current_domain_group: Some(DomainGroupId(5)),
            ..Default::default()
        };
        assert_eq!(
            same_group.check(&e),
            Some(EvictionReason::BrowsingInstanceNotSwapped)
        );
    }

    #[test]
    fn test_settled_history_is_bounded() {
        let mut coordinator = RestorationCoordinator::new();
        let mut first = None;
        for id in 0..(SETTLED_HISTORY as u64 + 1) {
            let token = coordinator
                .begin(&entry(id, 1), ActivationContext::default(), Instant::now())
                .unwrap();
            first.get_or_insert(token);
            coordinator.cancel(token).unwrap();
        }
        assert_eq!(coordinator.state(first.unwrap()), None);
    }
}
