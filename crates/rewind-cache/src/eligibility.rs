//! Store-time eligibility checks.

use compact_str::CompactString;
use smallvec::smallvec;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use rewind_filter::{DomainPolicy, PolicyVerdict, QueryParam, UrlPattern};

use crate::document::Page;
use crate::ids::DocumentId;
use crate::reason::{IneligibleReason, IneligibleReasons};

/// Outcome of [`EligibilityPolicy::can_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// The page may be cached.
    Eligible,
    /// The page must not be cached, for every listed reason.
    Ineligible(IneligibleReasons),
}

impl Eligibility {
    /// Returns true for [`Eligibility::Eligible`].
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Decides whether a page may enter the cache.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    enabled: bool,
    delegate_supported: bool,
    domain: DomainPolicy,
    disabled_documents: HashMap<DocumentId, CompactString>,
}

impl EligibilityPolicy {
    /// Creates a policy around a domain policy.
    pub fn new(enabled: bool, domain: DomainPolicy) -> Self {
        Self {
            enabled,
            delegate_supported: true,
            domain,
            disabled_documents: HashMap::new(),
        }
    }

    /// Returns true if caching is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switches caching on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Records whether the embedder can host cached pages.
    pub fn set_delegate_supported(&mut self, supported: bool) {
        debug!(supported, "delegate support changed");
        self.delegate_supported = supported;
    }

    /// Domain policy in effect.
    pub fn domain_policy(&self) -> &DomainPolicy {
        &self.domain
    }

    /// Replaces the domain policy.
    pub fn set_domain_policy(&mut self, domain: DomainPolicy) {
        self.domain = domain;
    }

    /// Replaces the allow and block lists.
    pub fn set_websites(&mut self, allowed: Vec<UrlPattern>, blocked: Vec<UrlPattern>) {
        self.domain.set_websites(allowed, blocked);
    }

    /// Replaces the blocked query parameters.
    pub fn set_blocked_params(&mut self, params: Vec<QueryParam>) {
        self.domain.set_blocked_params(params);
    }

    /// Returns true if `url` passes the domain policy.
    pub fn is_allowed(&self, url: &Url) -> bool {
        self.domain.is_allowed(url)
    }

    /// Marks a live document as opted out of caching.
    pub fn disable_document(&mut self, document: DocumentId, detail: impl Into<CompactString>) {
        self.disabled_documents.insert(document, detail.into());
    }

    /// Returns true if `document` opted out while it was live.
    pub fn is_disabled(&self, document: DocumentId) -> bool {
        self.disabled_documents.contains_key(&document)
    }

    /// Forgets opt-outs for the documents of `page`.
    pub fn clear_page(&mut self, page: &Page) {
        for doc in page.documents() {
            self.disabled_documents.remove(&doc.id());
        }
    }

    /// Checks `page`, collecting every reason it cannot be stored.
    ///
    /// When caching is switched off or the delegate is unsupported, only
    /// that reason is reported.
    pub fn can_store(&self, page: &Page) -> Eligibility {
        if !self.enabled {
            return Eligibility::Ineligible(smallvec![IneligibleReason::CacheDisabled]);
        }
        if !self.delegate_supported {
            return Eligibility::Ineligible(smallvec![IneligibleReason::DelegateUnsupported]);
        }

        let mut reasons = IneligibleReasons::new();
        let url = page.url();

        if !matches!(url.scheme(), "http" | "https") {
            reasons.push(IneligibleReason::SchemeNotHttpOrHttps);
        }
        match self.domain.check(url) {
            PolicyVerdict::Allowed => {}
            PolicyVerdict::DomainDisallowed => reasons.push(IneligibleReason::DomainDisallowed),
            PolicyVerdict::QueryParameterBlocked(param) => {
                reasons.push(IneligibleReason::QueryParameterBlocked {
                    parameter: param.as_str().into(),
                });
            }
        }
        if !(200..=299).contains(&page.http_status) {
            reasons.push(IneligibleReason::HttpStatusNotOk {
                status: page.http_status,
            });
        }
        if page.is_error_page {
            reasons.push(IneligibleReason::ErrorDocument);
        }
        if page.no_store {
            reasons.push(IneligibleReason::CacheControlNoStore);
        }
        if page.loading {
            reasons.push(IneligibleReason::Loading);
        }
        if page.related_active_contents > 0 {
            reasons.push(IneligibleReason::RelatedActiveContentsExist);
        }

        let features = page.capabilities().incompatible();
        if !features.is_empty() {
            reasons.push(IneligibleReason::BlocklistedFeatures { features });
        }

        if let Some(detail) = page
            .documents()
            .find_map(|doc| self.disabled_documents.get(&doc.id()))
        {
            reasons.push(IneligibleReason::DisableForRenderFrameHostCalled {
                detail: detail.clone(),
            });
        }

        if reasons.is_empty() {
            Eligibility::Eligible
        } else {
            Eligibility::Ineligible(reasons)
        }
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::new(true, DomainPolicy::new())
    }
}
