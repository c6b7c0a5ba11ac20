//! Per-game callbacks the engine drives, and the context they operate on.

use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::EngineConfig,
    engine::{
        PlayerId,
        actions::PlayerActionTracker,
        effects::Effects,
        phase::PhaseManager,
        roles::RoleManager,
        round::RoundManager,
        scoring::{RankEntry, ScoreCalculator, ScoreManager},
    },
    error::EngineResult,
};

/// Verdict of a game's rule function on one player action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the play counts (e.g. a correct answer).
    pub success: bool,
    /// Game data kept with the action; also the scoring context.
    #[serde(default)]
    pub data: Value,
    /// Ask the engine to end the current unit of play now.
    #[serde(default)]
    pub force_end: bool,
    /// Reason reported when `force_end` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    /// Scoring event applied at round end when the action succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_event: Option<String>,
}

impl ActionOutcome {
    /// Successful play carrying `data`.
    pub fn accepted(data: Value) -> Self {
        Self {
            success: true,
            data,
            ..Self::default()
        }
    }

    /// Unsuccessful play carrying `data`.
    pub fn rejected(data: Value) -> Self {
        Self {
            success: false,
            data,
            ..Self::default()
        }
    }

    /// Request the end of the current unit of play.
    pub fn ending(mut self, reason: impl Into<String>) -> Self {
        self.force_end = true;
        self.end_reason = Some(reason.into());
        self
    }

    /// Score the action under `event` when the round ends.
    pub fn scored_as(mut self, event: impl Into<String>) -> Self {
        self.score_event = Some(event.into());
        self
    }
}

/// What the engine does once a phase is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseDirective {
    /// Start the phase that follows in the plan; end the round after the last one.
    Next,
    /// Start the named phase.
    Start(String),
    /// Keep the phase current without a timer; an explicit advance moves on.
    Stay,
    /// End the current round.
    EndRound,
    /// Finish the match.
    Finish,
}

/// Composed module state of one match, handed to game hooks.
#[derive(Debug, Clone)]
pub struct MatchContext {
    /// Static configuration recorded at initialize.
    pub config: EngineConfig,
    /// Roster in join order.
    pub players: Vec<PlayerId>,
    /// Turns, rounds and eliminations.
    pub rounds: RoundManager,
    /// Running scores.
    pub scores: ScoreManager,
    /// Role assignments, when the match uses roles.
    pub roles: Option<RoleManager>,
    /// Per-round submissions.
    pub actions: PlayerActionTracker,
    /// Timed phases.
    pub phases: PhaseManager,
    /// Free-form game state owned by the rules.
    pub game_data: Value,
    pub(crate) effects: Effects,
}

impl MatchContext {
    /// Start a configured phase; the engine schedules its expiry and announces it.
    pub fn start_phase(&mut self, name: &str) -> EngineResult<()> {
        let record = self.phases.start_phase(name)?;
        self.effects.phase_started(&record);
        Ok(())
    }

    /// Whether the player is on the roster.
    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.players.contains(&player_id)
    }
}

/// Rule logic of one concrete game.
///
/// Hooks run while the match is exclusively held, so they may freely mutate the context.
pub trait GameRules: Send + Sync + Debug {
    /// Registry name of the game.
    fn name(&self) -> &str;

    /// Calculator used instead of the configured one.
    fn score_calculator(&self) -> Option<Arc<dyn ScoreCalculator>> {
        None
    }

    /// Called once when the match starts, after modules are reset.
    fn on_game_start(&self, _ctx: &mut MatchContext) -> EngineResult<()> {
        Ok(())
    }

    /// Called at the beginning of every round.
    fn on_round_start(&self, _ctx: &mut MatchContext) -> EngineResult<()> {
        Ok(())
    }

    /// Judge one player action.
    fn process_round_action(
        &self,
        ctx: &mut MatchContext,
        player_id: PlayerId,
        payload: &Value,
    ) -> EngineResult<ActionOutcome>;

    /// Called when a phase expires or is explicitly advanced.
    ///
    /// `callback` is the phase's configured `on_expire` id, defaulting to its name.
    fn on_phase_end(
        &self,
        _ctx: &mut MatchContext,
        _phase: &str,
        _callback: &str,
    ) -> EngineResult<PhaseDirective> {
        Ok(PhaseDirective::Next)
    }

    /// Final standings reported when the match finishes.
    fn final_ranking(&self, ctx: &MatchContext) -> Vec<RankEntry> {
        ctx.scores.ranking()
    }
}
