use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dao::schema::ActionTrackerRecord,
    engine::{PlayerId, hooks::ActionOutcome},
};

/// A submitted action together with the game's verdict on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    /// Raw payload sent by the player.
    pub payload: Value,
    /// Result of the game's rule function.
    pub outcome: ActionOutcome,
}

/// Read access to everything submitted during the current round.
pub trait RoundResults {
    /// Recorded actions keyed by player, in submission order.
    fn all_results(&self) -> &IndexMap<PlayerId, RecordedAction>;
}

/// Per-round "who has acted / who is locked" bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerActionTracker {
    locked: IndexSet<PlayerId>,
    actions: IndexMap<PlayerId, RecordedAction>,
}

impl PlayerActionTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or overwrite a player's action.
    pub fn set_player_action(&mut self, player_id: PlayerId, action: RecordedAction) {
        self.actions.insert(player_id, action);
    }

    /// Lock a player and report whether every active player is now locked.
    ///
    /// Locking an already locked player changes nothing.
    pub fn lock_player(&mut self, player_id: PlayerId, active: &[PlayerId]) -> bool {
        self.locked.insert(player_id);
        self.all_locked(active)
    }

    /// Whether every id in `active` is locked.
    pub fn all_locked(&self, active: &[PlayerId]) -> bool {
        active.iter().all(|id| self.locked.contains(id))
    }

    /// Whether the player already acted this round.
    pub fn is_player_locked(&self, player_id: PlayerId) -> bool {
        self.locked.contains(&player_id)
    }

    /// Action recorded for one player.
    pub fn action(&self, player_id: PlayerId) -> Option<&RecordedAction> {
        self.actions.get(&player_id)
    }

    /// Every recorded action.
    pub fn all_actions(&self) -> &IndexMap<PlayerId, RecordedAction> {
        &self.actions
    }

    /// Locked players in locking order.
    pub fn locked_players(&self) -> &IndexSet<PlayerId> {
        &self.locked
    }

    /// Forget every lock and action. Called once, when a round starts.
    pub fn reset(&mut self) {
        self.locked.clear();
        self.actions.clear();
    }

    /// Persistable view of the tracker.
    pub fn to_record(&self) -> ActionTrackerRecord {
        ActionTrackerRecord {
            locked: self.locked.iter().copied().collect(),
            actions: self.actions.clone(),
        }
    }

    /// Rebuild the tracker from its record.
    pub fn from_record(record: ActionTrackerRecord) -> Self {
        Self {
            locked: record.locked.into_iter().collect(),
            actions: record.actions,
        }
    }
}

impl RoundResults for PlayerActionTracker {
    fn all_results(&self) -> &IndexMap<PlayerId, RecordedAction> {
        &self.actions
    }
}
