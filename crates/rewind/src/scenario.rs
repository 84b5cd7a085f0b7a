//! Navigation scenario replay.
//!
//! A scenario is a YAML list of steps driven through a
//! [`BackForwardCache`] on a virtual clock:
//!
//! ```yaml
//! name: crash while restoring
//! steps:
//!   - leave: { entry: 1, process: 10, url: "https://a.com/" }
//!   - leave: { entry: 2, process: 11, url: "https://b.com/" }
//!   - advance: { ms: 500 }
//!   - back: { entry: 1, then: hold }
//!   - crash: { process: 10 }
//!   - flush
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use rewind_cache::{
    ActivationCheck, ActivationContext, BackForwardCache, CacheEffects, Capabilities,
    DisqualifyingEvent, DocumentId, DocumentInstance, DomainGroupId, EvictionReason, HostSignal,
    NavigationEntryId, NotRestoredReason, Page, ProcessId, RestoreStart, StoreOutcome,
};

/// A named list of steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Steps, applied in order. Each step is a single-key map such as
    /// `leave: {...}`, or a bare name for steps without fields.
    #[serde(
        default,
        deserialize_with = "serde_yaml::with::singleton_map_recursive::deserialize"
    )]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Loads a scenario from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    /// Parses a scenario from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Navigate away from a page, offering it to the cache.
    Leave(PageSpec),

    /// Navigate back or forward to an entry.
    Back(BackSpec),

    /// A process became foregrounded.
    Foreground { process: u32 },

    /// A process became backgrounded.
    Background { process: u32 },

    /// A process crashed.
    Crash { process: u32 },

    /// A document finished freezing.
    Freeze { document: u64 },

    /// A cached document reported something.
    Disqualify {
        document: u64,
        #[serde(flatten)]
        event: DisqualifyingEvent,
    },

    /// Move the clock forward, firing timers on the way.
    Advance {
        #[serde(default)]
        secs: u64,
        #[serde(default)]
        ms: u64,
    },

    /// Change the entry lifetime.
    SetTtl { secs: u64 },

    /// Change the capacity limits.
    SetCapacity { global: usize, foreground: usize },

    /// Turn caching on or off.
    SetEnabled { enabled: bool },

    /// Evict everything.
    Flush,
}

/// A page being navigated away from.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageSpec {
    /// Navigation entry.
    pub entry: u64,

    /// Main document id; defaults to the entry id.
    #[serde(default)]
    pub document: Option<u64>,

    /// Process hosting the main document.
    pub process: u32,

    /// Main document URL.
    pub url: Url,

    /// Domain group; defaults to the entry id.
    #[serde(default)]
    pub group: Option<u64>,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub error_page: bool,

    #[serde(default)]
    pub no_store: bool,

    #[serde(default)]
    pub loading: bool,

    /// Other live pages sharing the domain group.
    #[serde(default)]
    pub related: usize,

    /// Feature names used by the main document, e.g. `web_socket`.
    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub subframes: Vec<FrameSpec>,
}

fn default_status() -> u16 {
    200
}

/// A subframe document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSpec {
    pub document: u64,
    pub process: u32,
    pub url: Url,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A history navigation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackSpec {
    /// Target entry.
    pub entry: u64,

    /// Domain group of the page being left.
    #[serde(default)]
    pub group: Option<u64>,

    /// Domain groups with other live pages.
    #[serde(default)]
    pub live_groups: Vec<u64>,

    /// User agent override in effect for the navigation.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// What the host does once activation checks pass.
    #[serde(default)]
    pub then: Finish,
}

/// How a passed restore attempt ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finish {
    /// Acknowledge activation.
    #[default]
    Commit,
    /// Cancel the navigation.
    Cancel,
    /// Leave the attempt pending.
    Hold,
}

/// Something observable that happened during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Stored(NavigationEntryId),
    Rejected(NavigationEntryId, String),
    Evicted(NavigationEntryId, EvictionReason),
    Restored(NavigationEntryId),
    Pending(NavigationEntryId),
    NotRestored(NavigationEntryId, NotRestoredReason),
    Reissued(NavigationEntryId, EvictionReason),
}

impl Report {
    /// Short label for the report kind.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stored(_) => "stored",
            Self::Rejected(..) => "rejected",
            Self::Evicted(..) => "evicted",
            Self::Restored(_) => "restored",
            Self::Pending(_) => "pending",
            Self::NotRestored(..) => "not restored",
            Self::Reissued(..) => "reissued",
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored(id) | Self::Restored(id) | Self::Pending(id) => write!(f, "{}", id),
            Self::Rejected(id, reasons) => write!(f, "{} ({})", id, reasons),
            Self::Evicted(id, reason) | Self::Reissued(id, reason) => {
                write!(f, "{} ({})", id, reason)
            }
            Self::NotRestored(id, reason) => write!(f, "{} ({})", id, reason),
        }
    }
}

/// Drives a cache through scenario steps.
pub struct Simulator {
    cache: BackForwardCache,
    start: Instant,
    now: Instant,
}

impl Simulator {
    /// Creates a simulator whose clock starts now.
    pub fn new(cache: BackForwardCache) -> Self {
        let start = Instant::now();
        Self {
            cache,
            start,
            now: start,
        }
    }

    /// The cache being driven.
    pub fn cache(&self) -> &BackForwardCache {
        &self.cache
    }

    /// Virtual time since the simulation started.
    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    /// Current virtual instant.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Applies one step.
    pub fn step(&mut self, step: &Step) -> Result<Vec<Report>> {
        let mut reports = Vec::new();
        match step {
            Step::Leave(spec) => {
                let page = build_page(spec)?;
                match self.cache.store_page(page, self.now)? {
                    StoreOutcome::Stored { entry_id, effects } => {
                        reports.push(Report::Stored(entry_id));
                        collect(&mut reports, effects);
                    }
                    StoreOutcome::Rejected { entry_id, reasons } => {
                        let reasons: Vec<String> =
                            reasons.iter().map(|reason| reason.to_string()).collect();
                        reports.push(Report::Rejected(entry_id, reasons.join(", ")));
                    }
                }
            }
            Step::Back(spec) => self.back(spec, &mut reports)?,
            Step::Foreground { process } => self.signal(
                HostSignal::ProcessPlacementChanged {
                    process: ProcessId(*process),
                    foregrounded: true,
                },
                &mut reports,
            ),
            Step::Background { process } => self.signal(
                HostSignal::ProcessPlacementChanged {
                    process: ProcessId(*process),
                    foregrounded: false,
                },
                &mut reports,
            ),
            Step::Crash { process } => self.signal(
                HostSignal::ProcessTerminated {
                    process: ProcessId(*process),
                },
                &mut reports,
            ),
            Step::Freeze { document } => self.signal(
                HostSignal::FreezeAcknowledged {
                    document: DocumentId(*document),
                },
                &mut reports,
            ),
            Step::Disqualify { document, event } => self.signal(
                HostSignal::Disqualified {
                    document: DocumentId(*document),
                    event: event.clone(),
                },
                &mut reports,
            ),
            Step::Advance { secs, ms } => {
                let target = self.now + Duration::from_secs(*secs) + Duration::from_millis(*ms);
                self.advance_to(target, &mut reports);
            }
            Step::SetTtl { secs } => {
                self.cache.set_time_to_live(Duration::from_secs(*secs))?;
            }
            Step::SetCapacity { global, foreground } => {
                let effects = self.cache.set_capacity(*global, *foreground)?;
                collect(&mut reports, effects);
            }
            Step::SetEnabled { enabled } => {
                let effects = self.cache.set_enabled(*enabled);
                collect(&mut reports, effects);
            }
            Step::Flush => {
                let effects = self.cache.flush();
                collect(&mut reports, effects);
            }
        }
        Ok(reports)
    }

    fn back(&mut self, spec: &BackSpec, reports: &mut Vec<Report>) -> Result<()> {
        let entry_id = NavigationEntryId(spec.entry);
        let context = ActivationContext {
            current_domain_group: spec.group.map(DomainGroupId),
            live_domain_groups: spec.live_groups.iter().copied().map(DomainGroupId).collect(),
            user_agent_override: spec.user_agent.as_deref().map(Into::into),
        };

        let token = match self.cache.begin_restore(entry_id, context, self.now)? {
            RestoreStart::Requested(token) => token,
            RestoreStart::NotRestored(reason) => {
                reports.push(Report::NotRestored(entry_id, reason));
                return Ok(());
            }
        };

        match self.cache.check_activation(token)? {
            ActivationCheck::Failed(effects) => collect(reports, effects),
            ActivationCheck::Ready { .. } => match spec.then {
                Finish::Commit => {
                    self.signal(HostSignal::ActivationAcknowledged { token }, reports);
                }
                Finish::Cancel => {
                    let effects = self.cache.cancel_restore(token)?;
                    collect(reports, effects);
                }
                Finish::Hold => reports.push(Report::Pending(entry_id)),
            },
        }
        Ok(())
    }

    fn signal(&mut self, signal: HostSignal, reports: &mut Vec<Report>) {
        let effects = self.cache.handle_signal(signal, self.now);
        collect(reports, effects);
    }

    /// Fires every timer due up to `target`, each at its own deadline.
    fn advance_to(&mut self, target: Instant, reports: &mut Vec<Report>) {
        while let Some(deadline) = self.cache.next_deadline() {
            if deadline > target {
                break;
            }
            self.now = self.now.max(deadline);
            let effects = self.cache.run_timers(self.now);
            let stalled = effects.is_empty() && self.cache.next_deadline() == Some(deadline);
            collect(reports, effects);
            if stalled {
                break;
            }
        }
        self.now = target;
    }
}

fn collect(reports: &mut Vec<Report>, effects: CacheEffects) {
    for eviction in effects.evicted {
        reports.push(Report::Evicted(eviction.entry_id, eviction.reason));
    }
    for fresh in effects.reissued {
        reports.push(Report::Reissued(fresh.entry_id, fresh.reason));
    }
    for page in effects.restored {
        reports.push(Report::Restored(page.entry_id));
    }
}

fn parse_features(names: &[String]) -> Result<Capabilities> {
    names.iter().try_fold(Capabilities::empty(), |acc, name| {
        Capabilities::from_feature_name(name)
            .map(|feature| acc | feature)
            .with_context(|| format!("Unknown feature '{}'", name))
    })
}

fn build_page(spec: &PageSpec) -> Result<Page> {
    let main = DocumentInstance::new(
        DocumentId(spec.document.unwrap_or(spec.entry)),
        ProcessId(spec.process),
        spec.url.clone(),
    )
    .with_capabilities(parse_features(&spec.features)?);

    let mut page = Page::new(
        NavigationEntryId(spec.entry),
        DomainGroupId(spec.group.unwrap_or(spec.entry)),
        main,
    )
    .with_status(spec.status);
    page.is_error_page = spec.error_page;
    page.no_store = spec.no_store;
    page.loading = spec.loading;
    page.related_active_contents = spec.related;
    if let Some(ua) = &spec.user_agent {
        page = page.with_user_agent_override(ua.as_str());
    }

    for frame in &spec.subframes {
        let document = DocumentInstance::new(
            DocumentId(frame.document),
            ProcessId(frame.process),
            frame.url.clone(),
        )
        .with_capabilities(parse_features(&frame.features)?);
        page = page.with_subframe(document);
    }

    Ok(page)
}
