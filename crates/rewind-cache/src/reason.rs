//! Why pages leave the cache, and why they never got in.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::document::Capabilities;

/// Reasons collected when a page is refused at store time.
pub type IneligibleReasons = SmallVec<[IneligibleReason; 2]>;

/// Broad grouping of eviction reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    /// Capacity pressure.
    Capacity,
    /// Time-to-live or grace period elapsed.
    Time,
    /// The host or page asked for it.
    Explicit,
    /// Activation pre-checks failed.
    Consistency,
    /// Cache maintenance (flush, supersede).
    Maintenance,
}

/// Why a cached entry was evicted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EvictionReason {
    /// Global capacity exceeded.
    CacheLimit,
    /// Foreground capacity exceeded.
    ForegroundCacheLimit,
    /// Time-to-live elapsed.
    Timeout,
    /// The cache was flushed.
    Flushed,
    /// Script ran in a frozen document.
    JavaScriptExecution,
    /// A backing process died.
    RendererProcessKilled,
    /// The document opted out of caching.
    DisableForRenderFrameHostCalled {
        /// Caller-supplied detail.
        detail: CompactString,
    },
    /// A tracked feature was used after the page froze.
    SchedulerTrackedFeatureUsed {
        /// Offending features.
        features: Capabilities,
    },
    /// A host event made activation impossible.
    IgnoreEventAndEvict {
        /// Host-defined reason code.
        disallow_activation_reason: u64,
    },
    /// Documents did not acknowledge freezing in time.
    TimeoutPuttingInCache,
    /// Another live page shares the entry's domain group.
    ConflictingBrowsingInstance,
    /// The domain group was not swapped when leaving the page.
    BrowsingInstanceNotSwapped,
    /// The current user agent override differs from the stored one.
    UserAgentOverrideDiffers,
    /// The restoring navigation was cancelled.
    NavigationCancelledWhileRestoring,
    /// A newer page was stored for the same navigation entry.
    Superseded,
}

impl EvictionReason {
    /// Stable name used for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheLimit => "cache_limit",
            Self::ForegroundCacheLimit => "foreground_cache_limit",
            Self::Timeout => "timeout",
            Self::Flushed => "flushed",
            Self::JavaScriptExecution => "javascript_execution",
            Self::RendererProcessKilled => "renderer_process_killed",
            Self::DisableForRenderFrameHostCalled { .. } => "disable_for_render_frame_host_called",
            Self::SchedulerTrackedFeatureUsed { .. } => "scheduler_tracked_feature_used",
            Self::IgnoreEventAndEvict { .. } => "ignore_event_and_evict",
            Self::TimeoutPuttingInCache => "timeout_putting_in_cache",
            Self::ConflictingBrowsingInstance => "conflicting_browsing_instance",
            Self::BrowsingInstanceNotSwapped => "browsing_instance_not_swapped",
            Self::UserAgentOverrideDiffers => "user_agent_override_differs",
            Self::NavigationCancelledWhileRestoring => "navigation_cancelled_while_restoring",
            Self::Superseded => "superseded",
        }
    }

    /// Category of this reason.
    pub fn category(&self) -> ReasonCategory {
        match self {
            Self::CacheLimit | Self::ForegroundCacheLimit => ReasonCategory::Capacity,
            Self::Timeout | Self::TimeoutPuttingInCache => ReasonCategory::Time,
            Self::JavaScriptExecution
            | Self::RendererProcessKilled
            | Self::DisableForRenderFrameHostCalled { .. }
            | Self::SchedulerTrackedFeatureUsed { .. }
            | Self::IgnoreEventAndEvict { .. }
            | Self::NavigationCancelledWhileRestoring => ReasonCategory::Explicit,
            Self::ConflictingBrowsingInstance
            | Self::BrowsingInstanceNotSwapped
            | Self::UserAgentOverrideDiffers => ReasonCategory::Consistency,
            Self::Flushed | Self::Superseded => ReasonCategory::Maintenance,
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisableForRenderFrameHostCalled { detail } => {
                write!(f, "{} ({detail})", self.as_str())
            }
            Self::SchedulerTrackedFeatureUsed { features } => {
                write!(f, "{} ({features})", self.as_str())
            }
            Self::IgnoreEventAndEvict {
                disallow_activation_reason,
            } => write!(f, "{} ({disallow_activation_reason})", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Why a page was refused at store time.
///
/// Variants are declared in the order the eligibility checks run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibleReason {
    /// Caching is switched off.
    CacheDisabled,
    /// The embedder cannot host cached pages.
    DelegateUnsupported,
    /// Only http and https pages are cached.
    SchemeNotHttpOrHttps,
    /// Host/path rejected by the domain policy.
    DomainDisallowed,
    /// The query string carries a blocked parameter.
    QueryParameterBlocked {
        /// Matching `key=value` pair.
        parameter: CompactString,
    },
    /// Main document response was not 200.
    HttpStatusNotOk {
        /// Response status.
        status: u16,
    },
    /// Main document is an error page.
    ErrorDocument,
    /// Response carried `Cache-Control: no-store`.
    CacheControlNoStore,
    /// The page was still loading.
    Loading,
    /// Other live pages can script this one.
    RelatedActiveContentsExist,
    /// Documents used incompatible features.
    BlocklistedFeatures {
        /// Offending features.
        features: Capabilities,
    },
    /// A document opted out of caching before it was hidden.
    DisableForRenderFrameHostCalled {
        /// Caller-supplied detail.
        detail: CompactString,
    },
}

impl IneligibleReason {
    /// Stable name used for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheDisabled => "cache_disabled",
            Self::DelegateUnsupported => "delegate_unsupported",
            Self::SchemeNotHttpOrHttps => "scheme_not_http_or_https",
            Self::DomainDisallowed => "domain_disallowed",
            Self::QueryParameterBlocked { .. } => "query_parameter_blocked",
            Self::HttpStatusNotOk { .. } => "http_status_not_ok",
            Self::ErrorDocument => "error_document",
            Self::CacheControlNoStore => "cache_control_no_store",
            Self::Loading => "loading",
            Self::RelatedActiveContentsExist => "related_active_contents_exist",
            Self::BlocklistedFeatures { .. } => "blocklisted_features",
            Self::DisableForRenderFrameHostCalled { .. } => "disable_for_render_frame_host_called",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryParameterBlocked { parameter } => write!(f, "{} ({parameter})", self.as_str()),
            Self::HttpStatusNotOk { status } => write!(f, "{} ({status})", self.as_str()),
            Self::BlocklistedFeatures { features } => write!(f, "{} ({features})", self.as_str()),
            Self::DisableForRenderFrameHostCalled { detail } => {
                write!(f, "{} ({detail})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Why a navigation to a history entry was not served from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NotRestoredReason {
    /// Nothing is known about the entry.
    NotInCache,
    /// The page was refused at store time.
    Ineligible(IneligibleReasons),
    /// The page was cached, then evicted.
    Evicted(EvictionReason),
}

impl NotRestoredReason {
    /// Stable name of the primary reason, used for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInCache => "not_in_cache",
            Self::Ineligible(reasons) => reasons.first().map_or("ineligible", IneligibleReason::as_str),
            Self::Evicted(reason) => reason.as_str(),
        }
    }
}

impl fmt::Display for NotRestoredReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInCache => f.write_str("not in cache"),
            Self::Ineligible(reasons) => {
                f.write_str("ineligible: ")?;
                for (i, reason) in reasons.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{reason}")?;
                }
                Ok(())
            }
            Self::Evicted(reason) => write!(f, "evicted: {reason}"),
        }
    }
}
