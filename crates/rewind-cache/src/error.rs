//! Cache error types.
//!
//! These cover caller mistakes and broken invariants only. Ordinary cache
//! outcomes (evictions, rejected stores, aborted restores) are data, see
//! [`crate::reason`].

use thiserror::Error;

use crate::ids::{DocumentId, NavigationEntryId, RestoreToken};
use crate::lifecycle::LifecycleState;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Back/forward cache errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Capacity limits are inconsistent.
    #[error("invalid capacity: foreground cap {foreground} must not exceed global cap {global}, and global cap must be positive")]
    InvalidCapacity {
        /// Requested global cap.
        global: usize,
        /// Requested foreground cap.
        foreground: usize,
    },

    /// Time-to-live must be positive.
    #[error("time to live must be greater than zero")]
    ZeroTimeToLive,

    /// Domain policy could not be built.
    #[error("invalid domain policy: {0}")]
    Policy(#[from] rewind_filter::FilterError),

    // =========================================================================
    // Invariant Errors
    // =========================================================================
    /// A live entry already exists for this navigation entry.
    #[error("navigation entry {0} already has a live cache entry")]
    DuplicateEntry(NavigationEntryId),

    /// The document lifecycle does not allow this transition.
    #[error("document {document}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Document being transitioned.
        document: DocumentId,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// Another document already occupies the navigation slot.
    #[error("navigation entry {entry} is occupied by {occupant}")]
    SlotOccupied {
        /// Navigation entry.
        entry: NavigationEntryId,
        /// Document holding the slot.
        occupant: DocumentId,
    },

    /// The document is not tracked in this slot.
    #[error("document {document} is not tracked for navigation entry {entry}")]
    UnknownDocument {
        /// Navigation entry.
        entry: NavigationEntryId,
        /// Document that was looked up.
        document: DocumentId,
    },

    // =========================================================================
    // Restoration Errors
    // =========================================================================
    /// No restoration attempt is known under this token.
    #[error("unknown restore attempt {0}")]
    UnknownRestore(RestoreToken),

    /// A restoration of this entry is already in flight.
    #[error("navigation entry {0} is already being restored")]
    RestoreInProgress(NavigationEntryId),

    /// The attempt was aborted before it could commit.
    #[error("restore attempt {0} was aborted")]
    RestoreAborted(RestoreToken),

    /// The attempt is not in a state that allows this step.
    #[error("restore attempt {token} is {state}, expected {expected}")]
    RestoreOutOfOrder {
        /// Restore token.
        token: RestoreToken,
        /// Current state.
        state: crate::restore::RestoreState,
        /// State the step requires.
        expected: crate::restore::RestoreState,
    },

    // =========================================================================
    // Service Errors
    // =========================================================================
    /// The cache control loop is no longer running.
    #[error("cache service has shut down")]
    ServiceClosed,
}

impl CacheError {
    /// Returns true if this error reports a broken internal invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEntry(_) | Self::InvalidTransition { .. } | Self::SlotOccupied { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::InvalidCapacity {
            global: 2,
            foreground: 4,
        };
        assert!(err.to_string().contains("foreground cap 4"));

        let err = CacheError::DuplicateEntry(NavigationEntryId(7));
        assert_eq!(
            err.to_string(),
            "navigation entry nav#7 already has a live cache entry"
        );
        assert!(err.is_invariant_violation());
        assert!(!CacheError::ServiceClosed.is_invariant_violation());
    }
}
