//! Cache entries.

use compact_str::CompactString;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use url::Url;

use crate::document::{Capabilities, DocumentInstance, Page, ProxyHandle};
use crate::error::Result;
use crate::ids::{DocumentId, DomainGroupId, NavigationEntryId, ProcessId, RestoreToken};
use crate::lifecycle::LifecycleState;
use crate::reason::EvictionReason;

/// Freeze progress of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeState {
    /// Waiting for documents to acknowledge freezing.
    Freezing {
        /// Grace period end.
        deadline: Instant,
        /// Documents that have not acknowledged yet.
        pending: SmallVec<[DocumentId; 4]>,
    },
    /// Every document acknowledged.
    Frozen,
}

/// A suspended page held by the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    entry_id: NavigationEntryId,
    sequence: u64,
    inserted_at: Instant,
    url: Url,
    domain_group: DomainGroupId,
    user_agent_override: Option<CompactString>,
    documents: Vec<DocumentInstance>,
    proxies: Vec<ProxyHandle>,
    owning_processes: BTreeSet<ProcessId>,
    freeze: FreezeState,
}

impl CacheEntry {
    /// Suspends `page`, moving its documents into the cache.
    ///
    /// With a zero `freeze_timeout` the entry starts frozen.
    pub fn new(page: Page, sequence: u64, now: Instant, freeze_timeout: Duration) -> Result<Self> {
        let Page {
            entry_id,
            domain_group,
            user_agent_override,
            main,
            subframes,
            proxies,
            ..
        } = page;

        let url = main.url().clone();
        let mut documents = Vec::with_capacity(1 + subframes.len());
        documents.push(main);
        documents.extend(subframes);
        for doc in &mut documents {
            doc.transition(LifecycleState::InBackForwardCache)?;
        }

        let owning_processes = documents.iter().map(DocumentInstance::process).collect();
        let freeze = if freeze_timeout.is_zero() {
            FreezeState::Frozen
        } else {
            FreezeState::Freezing {
                deadline: now + freeze_timeout,
                pending: documents.iter().map(DocumentInstance::id).collect(),
            }
        };

        Ok(Self {
            entry_id,
            sequence,
            inserted_at: now,
            url,
            domain_group,
            user_agent_override,
            documents,
            proxies,
            owning_processes,
            freeze,
        })
    }

    /// Navigation entry this page belongs to.
    pub fn entry_id(&self) -> NavigationEntryId {
        self.entry_id
    }

    /// Insertion sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time the entry was stored.
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// URL of the root document.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Domain group.
    pub fn domain_group(&self) -> DomainGroupId {
        self.domain_group
    }

    /// Stored user agent override.
    pub fn user_agent_override(&self) -> Option<&str> {
        self.user_agent_override.as_deref()
    }

    /// Root document followed by subframes.
    pub fn documents(&self) -> &[DocumentInstance] {
        &self.documents
    }

    /// Root document id.
    pub fn main_document(&self) -> DocumentId {
        self.documents[0].id()
    }

    /// Proxies kept resolvable while cached.
    pub fn proxies(&self) -> &[ProxyHandle] {
        &self.proxies
    }

    /// Processes backing the entry's documents.
    pub fn owning_processes(&self) -> &BTreeSet<ProcessId> {
        &self.owning_processes
    }

    /// Processes the entry holds a reference on (documents and proxies).
    pub fn referenced_processes(&self) -> BTreeSet<ProcessId> {
        self.owning_processes
            .iter()
            .copied()
            .chain(self.proxies.iter().map(|proxy| proxy.process))
            .collect()
    }

    /// Returns true if `document` belongs to this entry.
    pub fn contains_document(&self, document: DocumentId) -> bool {
        self.documents.iter().any(|doc| doc.id() == document)
    }

    /// Union of features used by any document.
    pub fn capabilities(&self) -> Capabilities {
        self.documents
            .iter()
            .fold(Capabilities::empty(), |acc, doc| acc | doc.capabilities())
    }

    /// Freeze progress.
    pub fn freeze_state(&self) -> &FreezeState {
        &self.freeze
    }

    /// Returns true while documents are still freezing.
    pub fn is_freezing(&self) -> bool {
        matches!(self.freeze, FreezeState::Freezing { .. })
    }

    /// End of the freeze grace period, if still freezing.
    pub fn freeze_deadline(&self) -> Option<Instant> {
        match &self.freeze {
            FreezeState::Freezing { deadline, .. } => Some(*deadline),
            FreezeState::Frozen => None,
        }
    }

    /// Time at which the entry expires.
    pub fn expires_at(&self, ttl: Duration) -> Instant {
        self.inserted_at + ttl
    }

    /// Returns true once the entry has lived for `ttl`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now >= self.expires_at(ttl)
    }

    /// Remaining lifetime.
    pub fn remaining_ttl(&self, now: Instant, ttl: Duration) -> Duration {
        self.expires_at(ttl).saturating_duration_since(now)
    }

    /// Earliest time the scheduler must look at this entry.
    pub fn deadline(&self, ttl: Duration) -> Instant {
        let expiry = self.expires_at(ttl);
        self.freeze_deadline().map_or(expiry, |freeze| freeze.min(expiry))
    }

    /// Records a document's freeze acknowledgement.
    ///
    /// Returns true if this completed freezing.
    pub(crate) fn acknowledge_freeze(&mut self, document: DocumentId) -> bool {
        let FreezeState::Freezing { pending, .. } = &mut self.freeze else {
            return false;
        };
        pending.retain(|doc| *doc != document);
        if pending.is_empty() {
            self.freeze = FreezeState::Frozen;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_use(&mut self, document: DocumentId, used: Capabilities) {
        if let Some(doc) = self.documents.iter_mut().find(|doc| doc.id() == document) {
            doc.record_use(used);
        }
    }

    /// Tears the entry down, moving its documents to `Evicted`.
    pub(crate) fn evict(mut self, reason: EvictionReason) -> Eviction {
        for doc in &mut self.documents {
            // Documents were moved into the cache on construction.
            let _ = doc.transition(LifecycleState::Evicted);
        }
        Eviction {
            entry_id: self.entry_id,
            main_document: self.main_document(),
            reason,
            documents: self.documents,
            proxies: self.proxies,
            released_processes: Vec::new(),
        }
    }

    /// Document ids, root first.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.iter().map(DocumentInstance::id).collect()
    }

    /// Reactivates the entry's documents.
    pub(crate) fn restore(mut self, token: RestoreToken) -> Result<RestoredPage> {
        for doc in &mut self.documents {
            doc.transition(LifecycleState::Active)?;
        }
        Ok(RestoredPage {
            token,
            entry_id: self.entry_id,
            url: self.url,
            domain_group: self.domain_group,
            documents: self.documents,
            proxies: self.proxies,
        })
    }

    /// Read-only view for diagnostics.
    pub fn snapshot(&self, foreground: bool, now: Instant, ttl: Duration) -> EntrySnapshot {
        EntrySnapshot {
            entry_id: self.entry_id,
            url: self.url.to_string(),
            documents: self.document_ids(),
            processes: self.owning_processes.iter().copied().collect(),
            foreground,
            frozen: !self.is_freezing(),
            age_ms: now.saturating_duration_since(self.inserted_at).as_millis() as u64,
            remaining_ttl_ms: self.remaining_ttl(now, ttl).as_millis() as u64,
            capabilities: self.capabilities(),
        }
    }
}

/// Outcome of evicting one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Evicted navigation entry.
    pub entry_id: NavigationEntryId,
    /// Root document.
    pub main_document: DocumentId,
    /// Why.
    pub reason: EvictionReason,
    /// Documents torn down, now `Evicted`.
    pub documents: Vec<DocumentInstance>,
    /// Proxies released.
    pub proxies: Vec<ProxyHandle>,
    /// Processes no cached entry references any more.
    pub released_processes: Vec<ProcessId>,
}

impl Eviction {
    /// Ids of the torn-down documents, root first.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.iter().map(DocumentInstance::id).collect()
    }
}

/// A page handed back to the navigation controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredPage {
    /// Attempt that restored the page.
    pub token: RestoreToken,
    /// Navigation entry.
    pub entry_id: NavigationEntryId,
    /// Root URL.
    pub url: Url,
    /// Domain group.
    pub domain_group: DomainGroupId,
    /// Reactivated documents, root first.
    pub documents: Vec<DocumentInstance>,
    /// Proxies, still resolvable.
    pub proxies: Vec<ProxyHandle>,
}

/// Diagnostic view of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    /// Navigation entry.
    pub entry_id: NavigationEntryId,
    /// Root URL.
    pub url: String,
    /// Document ids, root first.
    pub documents: Vec<DocumentId>,
    /// Owning processes.
    pub processes: Vec<ProcessId>,
    /// Classified foreground.
    pub foreground: bool,
    /// All documents acknowledged freezing.
    pub frozen: bool,
    /// Time since insertion.
    pub age_ms: u64,
    /// Time until expiry.
    pub remaining_ttl_ms: u64,
    /// Features used.
    pub capabilities: Capabilities,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProxyId;

    fn page() -> Page {
        let main = DocumentInstance::new(
            DocumentId(1),
            ProcessId(1),
            Url::parse("https://a.com/").unwrap(),
        );
        let frame = DocumentInstance::new(
            DocumentId(2),
            ProcessId(2),
            Url::parse("https://b.com/").unwrap(),
        );
        Page::new(NavigationEntryId(5), DomainGroupId(1), main)
            .with_subframe(frame)
            .with_proxy(ProxyHandle {
                id: ProxyId(1),
                process: ProcessId(3),
            })
    }

    #[test]
    fn test_entry_creation() {
        let now = Instant::now();
        let entry = CacheEntry::new(page(), 1, now, Duration::from_secs(3)).unwrap();

        assert_eq!(entry.entry_id(), NavigationEntryId(5));
        assert_eq!(entry.main_document(), DocumentId(1));
        assert!(entry
            .documents()
            .iter()
            .all(|doc| doc.state() == LifecycleState::InBackForwardCache));
        assert_eq!(entry.owning_processes().len(), 2);
        assert_eq!(entry.referenced_processes().len(), 3);
        assert!(entry.is_freezing());
        assert_eq!(entry.freeze_deadline(), Some(now + Duration::from_secs(3)));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let ttl = Duration::from_secs(3600);
        let entry = CacheEntry::new(page(), 1, now, Duration::ZERO).unwrap();

        assert!(!entry.is_freezing());
        assert!(!entry.is_expired(now + ttl - Duration::from_millis(1), ttl));
        assert!(entry.is_expired(now + ttl, ttl));
        assert_eq!(entry.remaining_ttl(now + ttl, ttl), Duration::ZERO);
    }

    #[test]
    fn test_deadline_prefers_freeze() {
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        let entry = CacheEntry::new(page(), 1, now, Duration::from_secs(3)).unwrap();
        assert_eq!(entry.deadline(ttl), now + Duration::from_secs(3));
    }

    #[test]
    fn test_freeze_acknowledgement() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(page(), 1, now, Duration::from_secs(3)).unwrap();

        assert!(!entry.acknowledge_freeze(DocumentId(1)));
        assert!(entry.is_freezing());
        assert!(entry.acknowledge_freeze(DocumentId(2)));
        assert_eq!(entry.freeze_state(), &FreezeState::Frozen);
        assert!(!entry.acknowledge_freeze(DocumentId(2)));
    }

    #[test]
    fn test_evict_and_restore() {
        let now = Instant::now();
        let entry = CacheEntry::new(page(), 1, now, Duration::ZERO).unwrap();
        let eviction = entry.clone().evict(EvictionReason::Timeout);
        assert_eq!(eviction.reason, EvictionReason::Timeout);
        assert_eq!(eviction.document_ids(), vec![DocumentId(1), DocumentId(2)]);
        assert!(eviction
            .documents
            .iter()
            .all(|doc| doc.state() == LifecycleState::Evicted));
        assert_eq!(eviction.proxies.len(), 1);

        let restored = entry.restore(RestoreToken(1)).unwrap();
        assert!(restored
            .documents
            .iter()
            .all(|doc| doc.state() == LifecycleState::Active));
    }

    #[test]
    fn test_rejects_non_active_documents() {
        let mut p = page();
        p.main.transition(LifecycleState::Discarded).unwrap();
        assert!(CacheEntry::new(p, 1, Instant::now(), Duration::ZERO).is_err());
    }
}
