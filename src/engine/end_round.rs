//! Pluggable decisions on whether a turn or round is over.
//!
//! Strategies only hold immutable configuration, so `should_end` is a pure
//! function of its arguments.

use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{
    actions::RoundResults,
    hooks::ActionOutcome,
    phase::PhaseKind,
    round::RoundManager,
    turn::TurnMode,
};

/// Default pause between the end of a unit of play and the next one.
pub const DEFAULT_END_DELAY: Duration = Duration::from_secs(3);
/// Flag older games put in `ActionOutcome::data` to end a sequential turn.
pub const LEGACY_TURN_END_FLAG: &str = "end_turn";

/// Read-only view of the match handed to strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    /// Round being played.
    pub round: u32,
    /// Name of the current phase.
    pub phase: Option<String>,
    /// Kind of the current phase.
    pub phase_kind: Option<PhaseKind>,
    /// Players locked this round.
    pub locked: usize,
    /// Players still in play.
    pub active: usize,
}

/// A strategy's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndDecision {
    /// Whether the unit of play ends.
    pub should_end: bool,
    /// Why it ends.
    pub reason: Option<String>,
    /// Pause before the next unit of play starts.
    pub delay: Duration,
    /// Whether a winner was found, when the strategy can tell.
    pub winner_found: Option<bool>,
}

impl EndDecision {
    /// Keep playing.
    pub fn keep_playing() -> Self {
        Self {
            should_end: false,
            reason: None,
            delay: Duration::ZERO,
            winner_found: None,
        }
    }

    fn end(reason: String, delay: Duration) -> Self {
        Self {
            should_end: true,
            reason: Some(reason),
            delay,
            winner_found: None,
        }
    }
}

/// Decides whether the current turn or round should end after an action.
pub trait EndRoundStrategy: Send + Sync + Debug {
    /// Evaluate the outcome of the latest action.
    fn should_end(
        &self,
        snapshot: &MatchSnapshot,
        outcome: &ActionOutcome,
        rounds: &RoundManager,
        results: &dyn RoundResults,
    ) -> EndDecision;

    /// Mode this strategy implements.
    fn mode(&self) -> EndRoundMode;
}

/// Strategy selection stored in a match configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndRoundMode {
    /// See [`SimultaneousStrategy`].
    Simultaneous,
    /// See [`SequentialStrategy`].
    Sequential,
    /// See [`FreeStrategy`].
    Free,
    /// See [`PhaseBasedStrategy`].
    PhaseBased,
}

impl EndRoundMode {
    /// Mode matching a turn mode when none is configured.
    pub fn for_turn_mode(mode: TurnMode) -> Self {
        match mode {
            TurnMode::Sequential => EndRoundMode::Sequential,
            TurnMode::Simultaneous => EndRoundMode::Simultaneous,
            TurnMode::Free => EndRoundMode::Free,
        }
    }

    /// Instantiate the strategy with the configured delay.
    pub fn build(self, delay: Duration) -> Box<dyn EndRoundStrategy> {
        match self {
            EndRoundMode::Simultaneous => Box::new(SimultaneousStrategy { delay }),
            EndRoundMode::Sequential => Box::new(SequentialStrategy { delay }),
            EndRoundMode::Free => Box::new(FreeStrategy { delay }),
            EndRoundMode::PhaseBased => Box::new(PhaseBasedStrategy),
        }
    }
}

fn forced_reason(outcome: &ActionOutcome, fallback: &str) -> String {
    outcome
        .end_reason
        .clone()
        .unwrap_or_else(|| fallback.to_string())
}

fn legacy_turn_end(outcome: &ActionOutcome) -> bool {
    outcome
        .data
        .get(LEGACY_TURN_END_FLAG)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Everyone plays at once; ends only when the game forces it
/// ("first correct answer", "everyone answered" are detected by the game).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimultaneousStrategy {
    /// Pause before the next round.
    pub delay: Duration,
}

impl Default for SimultaneousStrategy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_END_DELAY,
        }
    }
}

impl EndRoundStrategy for SimultaneousStrategy {
    fn should_end(
        &self,
        _snapshot: &MatchSnapshot,
        outcome: &ActionOutcome,
        _rounds: &RoundManager,
        _results: &dyn RoundResults,
    ) -> EndDecision {
        if !outcome.force_end {
            return EndDecision::keep_playing();
        }
        EndDecision {
            winner_found: Some(outcome.success),
            ..EndDecision::end(forced_reason(outcome, "round_complete"), self.delay)
        }
    }

    fn mode(&self) -> EndRoundMode {
        EndRoundMode::Simultaneous
    }
}

/// One player at a time; the game ends the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialStrategy {
    /// Pause before the next turn.
    pub delay: Duration,
}

impl Default for SequentialStrategy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_END_DELAY,
        }
    }
}

impl EndRoundStrategy for SequentialStrategy {
    fn should_end(
        &self,
        _snapshot: &MatchSnapshot,
        outcome: &ActionOutcome,
        _rounds: &RoundManager,
        _results: &dyn RoundResults,
    ) -> EndDecision {
        if outcome.force_end || legacy_turn_end(outcome) {
            EndDecision::end(forced_reason(outcome, "turn_complete"), self.delay)
        } else {
            EndDecision::keep_playing()
        }
    }

    fn mode(&self) -> EndRoundMode {
        EndRoundMode::Sequential
    }
}

/// No ordering; the game ends the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeStrategy {
    /// Pause before the next round.
    pub delay: Duration,
}

impl Default for FreeStrategy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_END_DELAY,
        }
    }
}

impl EndRoundStrategy for FreeStrategy {
    fn should_end(
        &self,
        _snapshot: &MatchSnapshot,
        outcome: &ActionOutcome,
        _rounds: &RoundManager,
        _results: &dyn RoundResults,
    ) -> EndDecision {
        if outcome.force_end || legacy_turn_end(outcome) {
            EndDecision::end(forced_reason(outcome, "round_complete"), self.delay)
        } else {
            EndDecision::keep_playing()
        }
    }

    fn mode(&self) -> EndRoundMode {
        EndRoundMode::Free
    }
}

/// Dispatches on the kind of the current phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseBasedStrategy;

impl EndRoundStrategy for PhaseBasedStrategy {
    fn should_end(
        &self,
        snapshot: &MatchSnapshot,
        outcome: &ActionOutcome,
        _rounds: &RoundManager,
        _results: &dyn RoundResults,
    ) -> EndDecision {
        match snapshot.phase_kind {
            Some(PhaseKind::Active) if outcome.force_end => {
                EndDecision::end(forced_reason(outcome, "phase_complete"), Duration::ZERO)
            }
            // Scoring phases wait for an explicit advance; results are terminal.
            _ => EndDecision::keep_playing(),
        }
    }

    fn mode(&self) -> EndRoundMode {
        EndRoundMode::PhaseBased
    }
}
