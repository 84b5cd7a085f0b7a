//! Signals reported by document hosts and the process manager.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::document::Capabilities;
use crate::ids::{DocumentId, ProcessId, RestoreToken};

/// Something a cached document did that may disqualify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DisqualifyingEvent {
    /// Script ran after the document was hidden.
    ScriptExecuted,
    /// A message was queued for the document.
    MessageReceived,
    /// The document asked not to be cached.
    DisableCaching {
        /// Free-form detail from the caller.
        detail: CompactString,
    },
    /// A tracked feature was used.
    FeatureUsed {
        /// Features used.
        features: Capabilities,
    },
    /// A host event that makes activation impossible.
    ActivationDisallowed {
        /// Host-defined reason code.
        reason: u64,
    },
}

/// Asynchronous notification fed into the cache's control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HostSignal {
    /// A process moved between foreground and background.
    ProcessPlacementChanged {
        /// Process.
        process: ProcessId,
        /// New placement.
        foregrounded: bool,
    },
    /// A process exited or crashed.
    ProcessTerminated {
        /// Process.
        process: ProcessId,
    },
    /// A document reported a disqualifying event.
    Disqualified {
        /// Reporting document.
        document: DocumentId,
        /// What happened.
        #[serde(flatten)]
        event: DisqualifyingEvent,
    },
    /// A document finished freezing.
    FreezeAcknowledged {
        /// Document.
        document: DocumentId,
    },
    /// The host activated the documents of a restore attempt.
    ActivationAcknowledged {
        /// Attempt.
        token: RestoreToken,
    },
}

impl HostSignal {
    /// Stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessPlacementChanged { .. } => "process_placement_changed",
            Self::ProcessTerminated { .. } => "process_terminated",
            Self::Disqualified { .. } => "disqualified",
            Self::FreezeAcknowledged { .. } => "freeze_acknowledged",
            Self::ActivationAcknowledged { .. } => "activation_acknowledged",
        }
    }
}
