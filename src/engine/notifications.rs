use std::time::{Duration, SystemTime};

use indexmap::IndexMap;

use crate::engine::{
    PlayerId,
    actions::RecordedAction,
    scoring::{RankEntry, ScoreStatistics},
};

/// Wire name of [`MatchNotification::RoundStarted`].
pub const ROUND_STARTED: &str = "round.started";
/// Wire name of [`MatchNotification::RoundEnded`].
pub const ROUND_ENDED: &str = "round.ended";
/// Wire name of [`MatchNotification::TurnChanged`].
pub const TURN_CHANGED: &str = "turn.changed";
/// Wire name of [`MatchNotification::PhaseStarted`].
pub const PHASE_STARTED: &str = "phase.started";
/// Wire name of [`MatchNotification::PhaseEnded`].
pub const PHASE_ENDED: &str = "phase.ended";
/// Wire name of [`MatchNotification::PlayerLocked`].
pub const PLAYER_LOCKED: &str = "player.locked";
/// Wire name of [`MatchNotification::PlayersUnlocked`].
pub const PLAYER_UNLOCKED: &str = "player.unlocked";
/// Wire name of [`MatchNotification::GameFinished`].
pub const GAME_FINISHED: &str = "game.finished";

/// Game-agnostic signals emitted by the engine for transports to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchNotification {
    /// A round began.
    RoundStarted {
        /// Round number, starting at 1.
        round: u32,
    },
    /// A round was scored.
    RoundEnded {
        /// Round that just ended.
        round: u32,
        /// Why it ended.
        reason: Option<String>,
        /// Scores after the round.
        scores: IndexMap<PlayerId, i64>,
        /// Actions recorded during the round.
        results: IndexMap<PlayerId, RecordedAction>,
    },
    /// A sequential turn ended without closing the round.
    TurnChanged {
        /// Round still in play.
        round: u32,
        /// Player now holding the turn.
        player_id: PlayerId,
    },
    /// A phase began.
    PhaseStarted {
        /// Phase name.
        phase: String,
        /// Phase length, if timed.
        duration: Option<Duration>,
        /// Expiry instant, if timed.
        deadline: Option<SystemTime>,
    },
    /// A phase ended.
    PhaseEnded {
        /// Phase name.
        phase: String,
    },
    /// A player's action was recorded and they are locked for the round.
    PlayerLocked {
        /// Locked player.
        player_id: PlayerId,
    },
    /// Every lock was lifted for a new round.
    PlayersUnlocked {
        /// Round the unlock belongs to.
        round: u32,
    },
    /// The match reached its terminal state.
    GameFinished {
        /// Final standings.
        ranking: Vec<RankEntry>,
        /// Final scores.
        scores: IndexMap<PlayerId, i64>,
        /// Aggregate figures.
        statistics: ScoreStatistics,
    },
}

impl MatchNotification {
    /// Wire name of the notification.
    pub fn name(&self) -> &'static str {
        match self {
            MatchNotification::RoundStarted { .. } => ROUND_STARTED,
            MatchNotification::RoundEnded { .. } => ROUND_ENDED,
            MatchNotification::TurnChanged { .. } => TURN_CHANGED,
            MatchNotification::PhaseStarted { .. } => PHASE_STARTED,
            MatchNotification::PhaseEnded { .. } => PHASE_ENDED,
            MatchNotification::PlayerLocked { .. } => PLAYER_LOCKED,
            MatchNotification::PlayersUnlocked { .. } => PLAYER_UNLOCKED,
            MatchNotification::GameFinished { .. } => GAME_FINISHED,
        }
    }
}
