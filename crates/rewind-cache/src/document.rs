//! Documents, proxies and the page descriptor handed to the cache.

use bitflags::bitflags;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::Url;

use crate::error::Result;
use crate::ids::{DocumentId, DomainGroupId, NavigationEntryId, ProcessId, ProxyId};
use crate::lifecycle::LifecycleState;

bitflags! {
    /// Features a document has used.
    ///
    /// The flags in [`Capabilities::INCOMPATIBLE`] block caching at store
    /// time and evict a frozen entry when reported later.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Script ran after the document was hidden.
        const EXECUTED_SCRIPT = 1 << 0;
        /// A message was queued for the document while it was hidden.
        const OUT_OF_BAND_MESSAGE = 1 << 1;
        /// Open broadcast channel.
        const BROADCAST_CHANNEL = 1 << 2;
        /// Held web lock.
        const WEB_LOCKS = 1 << 3;
        /// Open web socket.
        const WEB_SOCKET = 1 << 4;
        /// Camera or microphone capture.
        const MEDIA_CAPTURE = 1 << 5;
        /// Peer connection.
        const WEB_RTC = 1 << 6;
        /// Pending payment request.
        const PAYMENT_REQUEST = 1 << 7;
    }
}

impl Capabilities {
    /// Features that make a document unfit for the cache.
    pub const INCOMPATIBLE: Self = Self::BROADCAST_CHANNEL
        .union(Self::WEB_LOCKS)
        .union(Self::WEB_SOCKET)
        .union(Self::MEDIA_CAPTURE)
        .union(Self::WEB_RTC)
        .union(Self::PAYMENT_REQUEST);

    /// Returns only the incompatible flags.
    pub fn incompatible(self) -> Self {
        self & Self::INCOMPATIBLE
    }

    /// Parses a lowercase feature name such as `web_socket`.
    pub fn from_feature_name(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(&name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

// ============================================================================
// Document Instance
// ============================================================================

/// One frame's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInstance {
    id: DocumentId,
    process: ProcessId,
    url: Url,
    state: LifecycleState,
    used: Capabilities,
}

impl DocumentInstance {
    /// Creates an active document.
    pub fn new(id: DocumentId, process: ProcessId, url: Url) -> Self {
        Self {
            id,
            process,
            url,
            state: LifecycleState::Active,
            used: Capabilities::empty(),
        }
    }

    /// Marks features the document has already used.
    pub fn with_capabilities(mut self, used: Capabilities) -> Self {
        self.used |= used;
        self
    }

    /// Document id.
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Backing process.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// Committed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Features used so far.
    pub fn capabilities(&self) -> Capabilities {
        self.used
    }

    pub(crate) fn transition(&mut self, next: LifecycleState) -> Result<()> {
        self.state = self.state.transition(self.id, next)?;
        Ok(())
    }

    pub(crate) fn record_use(&mut self, used: Capabilities) {
        self.used |= used;
    }
}

/// Placeholder for a frame of another page living in `process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyHandle {
    /// Proxy id.
    pub id: ProxyId,
    /// Process hosting the placeholder.
    pub process: ProcessId,
}

// ============================================================================
// Page
// ============================================================================

/// A page leaving the screen, as described by the navigation controller.
///
/// `main` is the root document; `subframes` follow in tree order.
#[derive(Debug, Clone)]
pub struct Page {
    /// History slot the page belongs to.
    pub entry_id: NavigationEntryId,
    /// Domain group of the page.
    pub domain_group: DomainGroupId,
    /// User agent override in effect when the page was shown.
    pub user_agent_override: Option<CompactString>,
    /// HTTP response status of the main document.
    pub http_status: u16,
    /// The main document is an error page.
    pub is_error_page: bool,
    /// The response carried `Cache-Control: no-store`.
    pub no_store: bool,
    /// The page has not finished loading.
    pub loading: bool,
    /// Other live pages that can script this one.
    pub related_active_contents: usize,
    /// Root document.
    pub main: DocumentInstance,
    /// Child frames.
    pub subframes: Vec<DocumentInstance>,
    /// Placeholders owned by the page.
    pub proxies: Vec<ProxyHandle>,
}

impl Page {
    /// Creates a loaded `200 OK` page around its root document.
    pub fn new(entry_id: NavigationEntryId, domain_group: DomainGroupId, main: DocumentInstance) -> Self {
        Self {
            entry_id,
            domain_group,
            user_agent_override: None,
            http_status: 200,
            is_error_page: false,
            no_store: false,
            loading: false,
            related_active_contents: 0,
            main,
            subframes: Vec::new(),
            proxies: Vec::new(),
        }
    }

    /// Adds a child frame.
    pub fn with_subframe(mut self, frame: DocumentInstance) -> Self {
        self.subframes.push(frame);
        self
    }

    /// Adds a proxy.
    pub fn with_proxy(mut self, proxy: ProxyHandle) -> Self {
        self.proxies.push(proxy);
        self
    }

    /// Sets the user agent override.
    pub fn with_user_agent_override(mut self, ua: impl Into<CompactString>) -> Self {
        self.user_agent_override = Some(ua.into());
        self
    }

    /// Sets the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    /// URL of the root document.
    pub fn url(&self) -> &Url {
        self.main.url()
    }

    /// Root document followed by all subframes.
    pub fn documents(&self) -> impl Iterator<Item = &DocumentInstance> {
        std::iter::once(&self.main).chain(self.subframes.iter())
    }

    /// Union of features used by any document.
    pub fn capabilities(&self) -> Capabilities {
        self.documents()
            .fold(Capabilities::empty(), |acc, doc| acc | doc.capabilities())
    }

    /// Processes backing the page's documents.
    pub fn processes(&self) -> BTreeSet<ProcessId> {
        self.documents().map(DocumentInstance::process).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: u64, process: u32, url: &str) -> DocumentInstance {
        DocumentInstance::new(DocumentId(id), ProcessId(process), Url::parse(url).unwrap())
    }

    #[test]
    fn test_capabilities_display() {
        assert_eq!(Capabilities::empty().to_string(), "none");
        assert_eq!(
            (Capabilities::WEB_SOCKET | Capabilities::BROADCAST_CHANNEL).to_string(),
            "broadcast_channel|web_socket"
        );
    }

    #[test]
    fn test_capabilities_incompatible() {
        let used = Capabilities::EXECUTED_SCRIPT | Capabilities::WEB_LOCKS;
        assert_eq!(used.incompatible(), Capabilities::WEB_LOCKS);
        assert!(Capabilities::OUT_OF_BAND_MESSAGE.incompatible().is_empty());
        assert_eq!(
            Capabilities::from_feature_name("web_socket"),
            Some(Capabilities::WEB_SOCKET)
        );
        assert_eq!(Capabilities::from_feature_name("teleport"), None);
    }

    #[test]
    fn test_page_processes_and_capabilities() {
        let page = Page::new(
            NavigationEntryId(1),
            DomainGroupId(1),
            doc(1, 10, "https://a.com/"),
        )
        .with_subframe(doc(2, 11, "https://b.com/").with_capabilities(Capabilities::WEB_RTC))
        .with_subframe(doc(3, 10, "https://a.com/frame"));

        assert_eq!(page.url().as_str(), "https://a.com/");
        assert_eq!(page.documents().count(), 3);
        assert_eq!(
            page.processes().into_iter().collect::<Vec<_>>(),
            vec![ProcessId(10), ProcessId(11)]
        );
        assert_eq!(page.capabilities(), Capabilities::WEB_RTC);
    }

    #[test]
    fn test_document_transition() {
        let mut d = doc(1, 1, "https://a.com/");
        d.transition(LifecycleState::InBackForwardCache).unwrap();
        d.transition(LifecycleState::Evicted).unwrap();
        assert!(d.transition(LifecycleState::Active).is_err());
        assert_eq!(d.state(), LifecycleState::Evicted);
    }
}
