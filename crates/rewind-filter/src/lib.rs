//! # Rewind URL Filter
//!
//! Domain and query-string policy deciding which pages may enter the
//! back/forward cache.
//!
//! ## Features
//!
//! - **Allow/block website lists**: scheme-agnostic `host + path-prefix`
//!   patterns, port and query ignored
//! - **Block list precedence**: a URL matching both lists is blocked
//! - **Blocked query parameters**: exact `key=value` pairs that veto caching
//! - **Reference-compatible list syntax**: comma separated website lists and
//!   `|` separated parameter lists
//!
//! ## Example
//!
//! ```rust
//! use rewind_filter::DomainPolicy;
//! use url::Url;
//!
//! let policy = DomainPolicy::builder()
//!     .allow("https://a.com/")
//!     .allow("https://b.com/path")
//!     .build()
//!     .unwrap();
//!
//! assert!(policy.is_allowed(&Url::parse("http://a.com:123/?x=1").unwrap()));
//! assert!(!policy.is_allowed(&Url::parse("https://prefix.a.com/").unwrap()));
//! assert!(policy.is_allowed(&Url::parse("https://b.com/path_abc").unwrap()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building a policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// A website pattern could not be parsed as a URL.
    #[error("Invalid website pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        message: String,
    },

    /// A blocked query parameter was not of the form `key=value`.
    #[error("Invalid query parameter '{0}': expected key=value")]
    InvalidParameter(String),
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;

// ============================================================================
// URL Pattern
// ============================================================================

/// A website pattern: exact host plus path prefix.
///
/// Scheme, port and query of both the pattern and the checked URL are
/// ignored. Subdomains do not match a parent-domain pattern. The path is a
/// plain string prefix, so `/path` matches `/path`, `/path/` and
/// `/path_abc`, while `/path/` does not match `/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UrlPattern {
    host: CompactString,
    path: CompactString,
    source: CompactString,
}

impl UrlPattern {
    /// Parses a pattern such as `https://b.com/path`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        let url = Url::parse(trimmed).map_err(|e| FilterError::InvalidPattern {
            pattern: trimmed.to_string(),
            message: e.to_string(),
        })?;

        let host = url.host_str().ok_or_else(|| FilterError::InvalidPattern {
            pattern: trimmed.to_string(),
            message: "pattern has no host".to_string(),
        })?;

        Ok(Self {
            host: CompactString::from(host),
            path: CompactString::from(url.path()),
            source: CompactString::from(trimmed),
        })
    }

    /// Parses a comma separated pattern list, skipping empty items.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Returns the pattern host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the pattern path prefix.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true if the URL falls under this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => host == self.host && url.path().starts_with(self.path.as_str()),
            None => false,
        }
    }
}

impl FromStr for UrlPattern {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UrlPattern {
    type Error = FilterError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<UrlPattern> for String {
    fn from(pattern: UrlPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// Query Parameters
// ============================================================================

/// A blocked `key=value` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryParam(CompactString);

impl QueryParam {
    /// Parses a `key=value` pair.
    pub fn parse(param: &str) -> Result<Self> {
        let trimmed = param.trim();
        match trimmed.split_once('=') {
            Some((key, _)) if !key.is_empty() => Ok(Self(CompactString::from(trimmed))),
            _ => Err(FilterError::InvalidParameter(trimmed.to_string())),
        }
    }

    /// Parses a `|` separated list such as `ibp=1|tbm=1`.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Returns the raw `key=value` text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for QueryParam {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for QueryParam {
    type Error = FilterError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<QueryParam> for String {
    fn from(param: QueryParam) -> Self {
        param.0.into()
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Policy Verdict
// ============================================================================

/// Outcome of checking a URL against a [`DomainPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// The URL may be cached.
    Allowed,

    /// Host/path rejected by the allow or block list.
    DomainDisallowed,

    /// The query string carries a blocked parameter.
    QueryParameterBlocked(QueryParam),
}

impl PolicyVerdict {
    /// Returns true for [`PolicyVerdict::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ============================================================================
// Domain Policy
// ============================================================================

/// Allow list, block list and blocked query parameters.
///
/// A URL is allowed when it matches no block-list pattern, and the allow
/// list is empty or some allow-list pattern matches, and its query string
/// contains none of the blocked parameters.
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allowed: Vec<UrlPattern>,
    blocked: Vec<UrlPattern>,
    blocked_params: HashSet<QueryParam>,
}

impl DomainPolicy {
    /// Creates a policy that allows everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a policy from pattern strings.
    pub fn builder() -> DomainPolicyBuilder {
        DomainPolicyBuilder::default()
    }

    /// Replaces the allow and block lists.
    pub fn set_websites(&mut self, allowed: Vec<UrlPattern>, blocked: Vec<UrlPattern>) {
        debug!(
            allowed = allowed.len(),
            blocked = blocked.len(),
            "updating website policy"
        );
        self.allowed = allowed;
        self.blocked = blocked;
    }

    /// Replaces the blocked query parameters.
    pub fn set_blocked_params(&mut self, params: impl IntoIterator<Item = QueryParam>) {
        self.blocked_params = params.into_iter().collect();
        debug!(count = self.blocked_params.len(), "updating blocked query parameters");
    }

    /// Returns the allow-list patterns.
    pub fn allowed(&self) -> &[UrlPattern] {
        &self.allowed
    }

    /// Returns the block-list patterns.
    pub fn blocked(&self) -> &[UrlPattern] {
        &self.blocked
    }

    /// Returns the blocked query parameters, sorted.
    pub fn blocked_params(&self) -> Vec<&QueryParam> {
        let mut params: Vec<_> = self.blocked_params.iter().collect();
        params.sort();
        params
    }

    /// Checks host and path against the website lists.
    pub fn is_host_path_allowed(&self, url: &Url) -> bool {
        if let Some(pattern) = self.blocked.iter().find(|p| p.matches(url)) {
            trace!(%url, %pattern, "url matches blocked website");
            return false;
        }

        self.allowed.is_empty() || self.allowed.iter().any(|p| p.matches(url))
    }

    /// Returns the first blocked parameter found in the query string.
    pub fn blocked_param_in(&self, url: &Url) -> Option<&QueryParam> {
        if self.blocked_params.is_empty() {
            return None;
        }

        let query = url.query()?;
        query.split('&').find_map(|piece| {
            self.blocked_params
                .iter()
                .find(|param| param.as_str() == piece)
        })
    }

    /// Checks a URL and explains the outcome.
    pub fn check(&self, url: &Url) -> PolicyVerdict {
        if !self.is_host_path_allowed(url) {
            return PolicyVerdict::DomainDisallowed;
        }

        match self.blocked_param_in(url) {
            Some(param) => PolicyVerdict::QueryParameterBlocked(param.clone()),
            None => PolicyVerdict::Allowed,
        }
    }

    /// Returns true if the URL may be cached under this policy.
    pub fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).is_allowed()
    }
}

/// Builder accumulating pattern strings before validation.
#[derive(Debug, Default, Clone)]
pub struct DomainPolicyBuilder {
    allowed: Vec<String>,
    blocked: Vec<String>,
    params: Vec<String>,
}

impl DomainPolicyBuilder {
    /// Adds an allow-list pattern.
    #[must_use]
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allowed.push(pattern.into());
        self
    }

    /// Adds a block-list pattern.
    #[must_use]
    pub fn block(mut self, pattern: impl Into<String>) -> Self {
        self.blocked.push(pattern.into());
        self
    }

    /// Adds a blocked `key=value` query parameter.
    #[must_use]
    pub fn block_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Validates every pattern and parameter.
    pub fn build(self) -> Result<DomainPolicy> {
        let allowed = self
            .allowed
            .iter()
            .map(|p| UrlPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;
        let blocked = self
            .blocked
            .iter()
            .map(|p| UrlPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;
        let params = self
            .params
            .iter()
            .map(|p| QueryParam::parse(p))
            .collect::<Result<Vec<_>>>()?;

        let mut policy = DomainPolicy::new();
        policy.set_websites(allowed, blocked);
        policy.set_blocked_params(params);
        Ok(policy)
    }
}

// ============================================================================
// Tests
// ============================================================================
