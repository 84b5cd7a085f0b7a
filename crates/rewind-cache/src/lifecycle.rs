//! Document lifecycle states and per-navigation-entry slots.
//!
//! A navigation entry has at most one document that is `Active` or
//! `InBackForwardCache`. Speculative documents created for an in-flight
//! navigation sit next to the occupant and never displace it until they
//! commit.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

use crate::error::{CacheError, Result};
use crate::ids::{DocumentId, NavigationEntryId};

/// Lifecycle state of one document instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created for a navigation that has not been chosen yet.
    Speculative,
    /// Chosen for a navigation, waiting to commit.
    PendingCommit,
    /// Displayed in a tab.
    Active,
    /// Suspended and held by the cache.
    InBackForwardCache,
    /// Removed from the cache; will never be shown again.
    Evicted,
    /// Dropped without ever being cached.
    Discarded,
}

impl LifecycleState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Speculative, PendingCommit)
                | (Speculative, Discarded)
                | (PendingCommit, Active)
                | (PendingCommit, Discarded)
                | (Active, InBackForwardCache)
                | (Active, Discarded)
                | (InBackForwardCache, Active)
                | (InBackForwardCache, Evicted)
        )
    }

    /// Validates a transition for `document`.
    pub fn transition(self, document: DocumentId, next: LifecycleState) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CacheError::InvalidTransition {
                document,
                from: self,
                to: next,
            })
        }
    }

    /// Returns true for states no document ever leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Evicted | Self::Discarded)
    }

    /// Returns true if the document claims its navigation slot.
    pub fn occupies_slot(self) -> bool {
        matches!(self, Self::Active | Self::InBackForwardCache)
    }

    /// Stable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Speculative => "speculative",
            Self::PendingCommit => "pending_commit",
            Self::Active => "active",
            Self::InBackForwardCache => "in_back_forward_cache",
            Self::Evicted => "evicted",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Navigation Slots
// ============================================================================

#[derive(Debug, Default)]
struct Slot {
    occupant: Option<(DocumentId, LifecycleState)>,
    speculative: SmallVec<[(DocumentId, LifecycleState); 2]>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.occupant.is_none() && self.speculative.is_empty()
    }
}

/// Tracks which document holds each navigation entry.
#[derive(Debug, Default)]
pub struct NavigationSlots {
    slots: HashMap<NavigationEntryId, Slot>,
}

impl NavigationSlots {
    /// Creates an empty slot table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document holding `entry`, with its state.
    pub fn occupant(&self, entry: NavigationEntryId) -> Option<(DocumentId, LifecycleState)> {
        self.slots.get(&entry).and_then(|slot| slot.occupant)
    }

    /// Returns the state of `document` within `entry`, if tracked.
    pub fn state_of(&self, entry: NavigationEntryId, document: DocumentId) -> Option<LifecycleState> {
        let slot = self.slots.get(&entry)?;
        match slot.occupant {
            Some((occupant, state)) if occupant == document => Some(state),
            _ => slot
                .speculative
                .iter()
                .find(|(doc, _)| *doc == document)
                .map(|(_, state)| *state),
        }
    }

    /// Returns true if `document` is the active occupant of some entry.
    pub fn is_active(&self, document: DocumentId) -> bool {
        self.slots
            .values()
            .any(|slot| slot.occupant == Some((document, LifecycleState::Active)))
    }

    /// Returns the speculative documents of `entry`.
    pub fn speculative(&self, entry: NavigationEntryId) -> Vec<(DocumentId, LifecycleState)> {
        self.slots
            .get(&entry)
            .map(|slot| slot.speculative.to_vec())
            .unwrap_or_default()
    }

    /// Marks `document` as the active occupant of `entry`.
    ///
    /// Fails if a different document is held in the cache for this entry.
    pub fn activate(&mut self, entry: NavigationEntryId, document: DocumentId) -> Result<()> {
        let slot = self.slots.entry(entry).or_default();
        if let Some((occupant, LifecycleState::InBackForwardCache)) = slot.occupant {
            if occupant != document {
                return Err(CacheError::SlotOccupied { entry, occupant });
            }
        }
        trace!(%entry, %document, "slot active");
        slot.occupant = Some((document, LifecycleState::Active));
        Ok(())
    }

    /// Records that the occupant of `entry` moved into the cache.
    pub fn cache(&mut self, entry: NavigationEntryId, document: DocumentId) -> Result<()> {
        let slot = self.slots.entry(entry).or_default();
        match slot.occupant {
            Some((occupant, LifecycleState::InBackForwardCache)) if occupant != document => {
                Err(CacheError::SlotOccupied { entry, occupant })
            }
            _ => {
                trace!(%entry, %document, "slot cached");
                slot.occupant = Some((document, LifecycleState::InBackForwardCache));
                Ok(())
            }
        }
    }

    /// Releases `entry` if `document` holds it.
    pub fn vacate(&mut self, entry: NavigationEntryId, document: DocumentId) {
        if let Some(slot) = self.slots.get_mut(&entry) {
            if matches!(slot.occupant, Some((occupant, _)) if occupant == document) {
                trace!(%entry, %document, "slot vacated");
                slot.occupant = None;
            }
            if slot.is_empty() {
                self.slots.remove(&entry);
            }
        }
    }

    /// Adds a speculative document for `entry`.
    pub fn add_speculative(&mut self, entry: NavigationEntryId, document: DocumentId) {
        let slot = self.slots.entry(entry).or_default();
        if !slot.speculative.iter().any(|(doc, _)| *doc == document) {
            slot.speculative.push((document, LifecycleState::Speculative));
        }
    }

    /// Moves a speculative document to `PendingCommit`.
    pub fn ready_to_commit(&mut self, entry: NavigationEntryId, document: DocumentId) -> Result<()> {
        let state = self.speculative_state_mut(entry, document)?;
        *state = state.transition(document, LifecycleState::PendingCommit)?;
        Ok(())
    }

    /// Commits a pending document, making it the active occupant of `entry`.
    pub fn commit(&mut self, entry: NavigationEntryId, document: DocumentId) -> Result<()> {
        let state = *self.speculative_state_mut(entry, document)?;
        state.transition(document, LifecycleState::Active)?;
        self.activate(entry, document)?;
        if let Some(slot) = self.slots.get_mut(&entry) {
            slot.speculative.retain(|(doc, _)| *doc != document);
        }
        Ok(())
    }

    /// Drops a speculative or pending document of `entry`.
    pub fn discard(&mut self, entry: NavigationEntryId, document: DocumentId) -> Result<()> {
        let state = *self.speculative_state_mut(entry, document)?;
        state.transition(document, LifecycleState::Discarded)?;
        if let Some(slot) = self.slots.get_mut(&entry) {
            slot.speculative.retain(|(doc, _)| *doc != document);
            if slot.is_empty() {
                self.slots.remove(&entry);
            }
        }
        Ok(())
    }

    /// Number of navigation entries with tracked documents.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn speculative_state_mut(
        &mut self,
        entry: NavigationEntryId,
        document: DocumentId,
    ) -> Result<&mut LifecycleState> {
        self.slots
            .get_mut(&entry)
            .and_then(|slot| {
                slot.speculative
                    .iter_mut()
                    .find(|(doc, _)| *doc == document)
                    .map(|(_, state)| state)
            })
            .ok_or(CacheError::UnknownDocument { entry, document })
    }
}
