//! Website policy configuration.

use super::Result;
use rewind_filter::{DomainPolicy, QueryParam, UrlPattern};
use serde::{Deserialize, Serialize};

/// A list given either as a sequence or as one delimited string.
///
/// Both of these are accepted:
///
/// ```yaml
/// allowed_websites: ["https://a.com", "https://b.com/path"]
/// allowed_websites: "https://a.com, https://b.com/path"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    /// One item per element.
    Items(Vec<String>),

    /// Items joined by a delimiter.
    Joined(String),
}

impl StringList {
    /// Splits into trimmed, non-empty items.
    pub fn items(&self, delimiter: char) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Self::Items(items) => items.iter().map(String::as_str).collect(),
            Self::Joined(joined) => joined.split(delimiter).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns true if there are no items.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Items(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::Joined(joined) => joined.trim().is_empty(),
        }
    }
}

impl Default for StringList {
    fn default() -> Self {
        Self::Items(Vec::new())
    }
}

/// Website allow/block lists and blocked query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Only these websites are cached when non-empty (comma separated).
    pub allowed_websites: StringList,

    /// These websites are never cached (comma separated).
    pub blocked_websites: StringList,

    /// `key=value` parameters that prevent caching (`|` separated).
    pub blocked_cgi_params: StringList,
}

impl PolicyConfig {
    /// Checks that every pattern and parameter parses.
    pub fn validate(&self) -> Result<()> {
        self.allowed()?;
        self.blocked()?;
        self.params()?;
        Ok(())
    }

    /// Parsed allow list.
    pub fn allowed(&self) -> Result<Vec<UrlPattern>> {
        parse_patterns(&self.allowed_websites)
    }

    /// Parsed block list.
    pub fn blocked(&self) -> Result<Vec<UrlPattern>> {
        parse_patterns(&self.blocked_websites)
    }

    /// Parsed blocked query parameters.
    pub fn params(&self) -> Result<Vec<QueryParam>> {
        Ok(self
            .blocked_cgi_params
            .items('|')
            .into_iter()
            .map(QueryParam::parse)
            .collect::<rewind_filter::Result<_>>()?)
    }

    /// Builds the domain policy.
    pub fn domain_policy(&self) -> Result<DomainPolicy> {
        let mut policy = DomainPolicy::new();
        policy.set_websites(self.allowed()?, self.blocked()?);
        policy.set_blocked_params(self.params()?);
        Ok(policy)
    }
}

fn parse_patterns(list: &StringList) -> Result<Vec<UrlPattern>> {
    Ok(list
        .items(',')
        .into_iter()
        .map(UrlPattern::parse)
        .collect::<rewind_filter::Result<_>>()?)
}
