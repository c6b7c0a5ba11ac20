use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::EngineConfig,
    dto::format_system_time,
    engine::{
        PlayerId,
        game::{ActionReport, GameEngine},
        lifecycle::MatchPhase,
        phase::PhaseKind,
        scoring::RankEntry,
        turn::TurnMode,
    },
};

/// Most players a single match accepts.
pub const MAX_PLAYERS: u64 = 64;

#[derive(Debug, Deserialize, Validate)]
/// Payload used to create and configure a match.
pub struct CreateMatchRequest {
    /// Registry name of the game.
    #[validate(length(min = 1, max = 64))]
    pub game: String,
    /// Roster in join order.
    #[validate(length(min = 1, max = MAX_PLAYERS))]
    pub players: Vec<PlayerId>,
    /// Engine configuration; the server default applies when absent.
    #[validate(nested)]
    #[serde(default)]
    pub config: Option<EngineConfig>,
}

#[derive(Debug, Deserialize)]
/// One player action.
pub struct ActionRequest {
    /// Acting player.
    pub player_id: PlayerId,
    /// Game-specific payload passed to the rule hook.
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
/// Outcome of a submitted action.
pub struct ActionResponse {
    /// The game's verdict.
    pub success: bool,
    /// Game-specific result.
    pub data: Value,
    /// Whether every active player has now acted.
    pub all_locked: bool,
    /// Whether the action ended the turn, phase or round.
    pub ended: bool,
    /// Why it ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ActionReport> for ActionResponse {
    fn from(report: ActionReport) -> Self {
        Self {
            success: report.outcome.success,
            data: report.outcome.data,
            all_locked: report.all_locked,
            ended: report.decision.should_end,
            reason: report.decision.reason,
        }
    }
}

#[derive(Debug, Serialize)]
/// Phase currently running.
pub struct PhaseView {
    /// Phase name.
    pub name: String,
    /// Phase kind.
    pub kind: PhaseKind,
    /// RFC 3339 expiry instant, for timed phases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    /// Time left before expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
/// Role set and current holders.
pub struct RolesView {
    /// Role set.
    pub available: Vec<String>,
    /// Whether players may hold several roles.
    pub allow_multiple: bool,
    /// Roles per player; players without a role are left out.
    pub assignments: IndexMap<PlayerId, Vec<String>>,
}

#[derive(Debug, Serialize)]
/// Public view of a match.
pub struct MatchView {
    /// Match id.
    pub match_id: Uuid,
    /// Registry name of the game.
    pub game: String,
    /// Lifecycle state.
    pub status: MatchPhase,
    /// Applied lifecycle transitions.
    pub version: usize,
    /// Round in play.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    /// Round count; 0 means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rounds: Option<u32>,
    /// Turn mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_mode: Option<TurnMode>,
    /// Turn holder, in sequential matches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_player: Option<PlayerId>,
    /// Phase running now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseView>,
    /// Roster in join order.
    pub players: Vec<PlayerId>,
    /// Players currently out.
    pub eliminated: Vec<PlayerId>,
    /// Players who acted this round.
    pub locked: Vec<PlayerId>,
    /// Scores in roster order.
    pub scores: IndexMap<PlayerId, i64>,
    /// Standings.
    pub ranking: Vec<RankEntry>,
    /// Roles, when the match uses them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<RolesView>,
}

impl MatchView {
    /// Snapshot `engine` as seen at `now`.
    pub fn from_engine(engine: &GameEngine, now: SystemTime) -> Self {
        let ctx = engine.context();
        let sequential = ctx.is_some_and(|ctx| ctx.rounds.turns().mode() == TurnMode::Sequential);

        Self {
            match_id: engine.match_id(),
            game: engine.game().to_string(),
            status: engine.phase(),
            version: engine.version(),
            round: ctx.map(|ctx| ctx.rounds.current_round()),
            total_rounds: ctx.map(|ctx| ctx.rounds.total_rounds()),
            turn_mode: ctx.map(|ctx| ctx.rounds.turns().mode()),
            current_player: ctx
                .filter(|_| sequential)
                .map(|ctx| ctx.rounds.current_player()),
            phase: ctx.and_then(|ctx| {
                let record = ctx.phases.current()?;
                Some(PhaseView {
                    name: record.name.clone(),
                    kind: record.kind,
                    deadline: record.deadline.map(format_system_time),
                    remaining_ms: ctx
                        .phases
                        .remaining(now)
                        .map(|left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX)),
                })
            }),
            players: ctx.map(|ctx| ctx.players.clone()).unwrap_or_default(),
            eliminated: ctx
                .map(|ctx| {
                    ctx.players
                        .iter()
                        .copied()
                        .filter(|id| ctx.rounds.is_eliminated(*id))
                        .collect()
                })
                .unwrap_or_default(),
            locked: ctx
                .map(|ctx| ctx.actions.locked_players().iter().copied().collect())
                .unwrap_or_default(),
            scores: ctx
                .map(|ctx| ctx.scores.scores().clone())
                .unwrap_or_default(),
            ranking: ctx.map(|ctx| ctx.scores.ranking()).unwrap_or_default(),
            roles: ctx.and_then(|ctx| {
                let roles = ctx.roles.as_ref()?;
                Some(RolesView {
                    available: roles.available_roles().iter().cloned().collect(),
                    allow_multiple: roles.allows_multiple_roles(),
                    assignments: ctx
                        .players
                        .iter()
                        .filter_map(|id| {
                            let held = roles.player_roles(*id);
                            (!held.is_empty())
                                .then(|| (*id, held.into_iter().map(str::to_string).collect()))
                        })
                        .collect(),
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{config::RoleConfig, engine::game::MatchSetup, games::tally::Tally};

    #[test]
    fn create_request_requires_players() {
        let request: CreateMatchRequest =
            serde_json::from_value(json!({ "game": "tally", "players": [] })).unwrap();
        assert!(request.validate().is_err());

        let request: CreateMatchRequest =
            serde_json::from_value(json!({ "game": "tally", "players": [1, 2] })).unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn nested_engine_config_is_validated() {
        let request: CreateMatchRequest = serde_json::from_value(json!({
            "game": "tally",
            "players": [1],
            "config": { "phases": [{ "name": "" }] }
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn view_of_a_configured_match() {
        let mut engine = GameEngine::new(Uuid::new_v4(), Arc::new(Tally));
        engine
            .initialize(MatchSetup {
                players: vec![4, 9],
                config: EngineConfig {
                    roles: Some(RoleConfig {
                        available_roles: vec!["host".into(), "guest".into()],
                        allow_multiple_roles: false,
                    }),
                    ..EngineConfig::default()
                },
            })
            .unwrap();

        let view = MatchView::from_engine(&engine, SystemTime::now());
        assert_eq!(view.status, MatchPhase::Configured);
        assert_eq!(view.current_player, Some(4));
        assert_eq!(view.scores.values().copied().collect::<Vec<_>>(), vec![0, 0]);
        let roles = view.roles.unwrap();
        assert_eq!(roles.available, vec!["host", "guest"]);
        assert!(roles.assignments.is_empty());
        assert!(view.phase.is_none());
    }
}
