//! Minimal reference game: every player submits a number of points once per round.

use serde_json::{Value, json};

use crate::{
    engine::{
        PlayerId,
        hooks::{ActionOutcome, GameRules, MatchContext},
        turn::TurnMode,
    },
    error::{EngineError, EngineResult},
};

/// Registry name.
pub const TALLY: &str = "tally";
/// Scoring event awarded for a submission.
pub const POINTS_EVENT: &str = "points";
/// Largest submission accepted.
pub const MAX_POINTS: i64 = 100;

/// Submissions score their own value; the round ends once every active player is in.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tally;

impl GameRules for Tally {
    fn name(&self) -> &str {
        TALLY
    }

    fn on_round_start(&self, ctx: &mut MatchContext) -> EngineResult<()> {
        let round = ctx.rounds.current_round();
        ctx.game_data = json!({ "round": round, "submitted": 0 });
        Ok(())
    }

    fn process_round_action(
        &self,
        ctx: &mut MatchContext,
        player_id: PlayerId,
        payload: &Value,
    ) -> EngineResult<ActionOutcome> {
        let points = payload
            .get("points")
            .and_then(Value::as_i64)
            .filter(|points| (0..=MAX_POINTS).contains(points))
            .ok_or_else(|| {
                EngineError::invalid(format!("`points` must be an integer in 0..={MAX_POINTS}"))
            })?;

        if let Some(submitted) = ctx.game_data.get_mut("submitted") {
            *submitted = json!(submitted.as_u64().unwrap_or(0) + 1);
        }

        let outcome = ActionOutcome::accepted(json!({ "points": points })).scored_as(POINTS_EVENT);
        if ctx.rounds.turns().mode() == TurnMode::Sequential {
            return Ok(outcome.ending("turn_complete"));
        }

        let everyone_in = ctx
            .rounds
            .active_players()
            .into_iter()
            .all(|id| id == player_id || ctx.actions.is_player_locked(id));
        if everyone_in {
            Ok(outcome.ending("all_locked"))
        } else {
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::EngineConfig,
        engine::{
            game::{GameEngine, MatchSetup},
            lifecycle::MatchPhase,
        },
    };

    fn started(turn_mode: TurnMode) -> GameEngine {
        let mut engine = GameEngine::new(Uuid::new_v4(), Arc::new(Tally));
        engine
            .initialize(MatchSetup {
                players: vec![1, 2, 3],
                config: EngineConfig {
                    turn_mode,
                    total_rounds: 2,
                    ..EngineConfig::default()
                },
            })
            .unwrap();
        engine.start_game().unwrap();
        engine
    }

    #[test]
    fn round_ends_when_the_last_player_submits() {
        let mut engine = started(TurnMode::Simultaneous);
        engine.process_round_action(2, json!({ "points": 5 })).unwrap();
        engine.process_round_action(1, json!({ "points": 1 })).unwrap();
        assert_eq!(engine.phase(), MatchPhase::Playing);
        assert_eq!(engine.context().unwrap().game_data["submitted"], 2);

        let report = engine.process_round_action(3, json!({ "points": 0 })).unwrap();
        assert_eq!(report.decision.reason.as_deref(), Some("all_locked"));
        assert_eq!(engine.phase(), MatchPhase::RoundEnding);
        assert_eq!(engine.context().unwrap().scores.score(2), Some(5));
    }

    #[test]
    fn out_of_range_points_are_refused() {
        let mut engine = started(TurnMode::Free);
        for payload in [json!({}), json!({ "points": -1 }), json!({ "points": 101 })] {
            assert!(matches!(
                engine.process_round_action(1, payload),
                Err(EngineError::InvalidTransition(_))
            ));
        }
        assert!(!engine.context().unwrap().actions.is_player_locked(1));
    }

    #[test]
    fn sequential_play_passes_the_turn() {
        let mut engine = started(TurnMode::Sequential);
        let report = engine.process_round_action(1, json!({ "points": 3 })).unwrap();
        assert_eq!(report.decision.reason.as_deref(), Some("turn_complete"));
        assert_eq!(engine.phase(), MatchPhase::Playing);
        assert_eq!(engine.context().unwrap().rounds.current_player(), 2);

        engine.process_round_action(2, json!({ "points": 1 })).unwrap();
        engine.process_round_action(3, json!({ "points": 2 })).unwrap();
        assert_eq!(engine.phase(), MatchPhase::RoundEnding);
        assert_eq!(engine.context().unwrap().scores.score(1), Some(3));
    }
}
