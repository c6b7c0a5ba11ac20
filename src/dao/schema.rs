//! Versioned persisted form of a match, with migration from legacy documents.
//!
//! Documents are stored as raw JSON so that a blob this build cannot read is
//! kept intact for inspection instead of being dropped or overwritten.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    engine::{
        PlayerId,
        actions::RecordedAction,
        lifecycle::MatchPhase,
        phase::PhaseRecord,
        scoring::ScoreEvent,
        turn::{Direction, TurnMode},
    },
};

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Persisted rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Rotation order.
    pub order: Vec<PlayerId>,
    /// Cursor into `order`.
    pub index: usize,
    /// Turn mode.
    #[serde(default)]
    pub mode: TurnMode,
    /// Whether the cursor is frozen.
    #[serde(default)]
    pub paused: bool,
    /// `1` forward, `-1` backward.
    #[serde(default)]
    pub direction: Direction,
}

/// Persisted round bookkeeping with its nested rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round in play, from 1.
    pub current_round: u32,
    /// Round count; 0 means unbounded.
    #[serde(default)]
    pub total_rounds: u32,
    /// Players out for the rest of the match.
    #[serde(default)]
    pub permanently_eliminated: BTreeSet<PlayerId>,
    /// Players out until the round rolls over.
    #[serde(default)]
    pub temporarily_eliminated: BTreeSet<PlayerId>,
    /// Cursor position the current round started at.
    #[serde(default)]
    pub round_start_index: usize,
    /// Nested rotation.
    pub turn_system: TurnRecord,
}

/// Persisted scores; `score_history` is absent when history is off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRecord {
    /// Scores in roster order.
    pub scores: IndexMap<PlayerId, i64>,
    /// Score events, oldest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_history: Option<Vec<ScoreEvent>>,
}

/// Roles of one player: a single name, or a list in multi-role matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerRoles {
    /// Single-role matches.
    One(String),
    /// Multi-role matches.
    Many(Vec<String>),
}

/// Persisted role assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Role set.
    pub available_roles: Vec<String>,
    /// Whether players may hold several roles.
    #[serde(default)]
    pub allow_multiple_roles: bool,
    /// Current holders.
    #[serde(default)]
    pub player_roles: IndexMap<PlayerId, PlayerRoles>,
}

/// Persisted per-round submissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionTrackerRecord {
    /// Players locked this round.
    #[serde(default)]
    pub locked: Vec<PlayerId>,
    /// Recorded actions this round.
    #[serde(default)]
    pub actions: IndexMap<PlayerId, RecordedAction>,
}

/// Current persisted document of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Layout version, [`SCHEMA_VERSION`] when written by this build.
    pub schema_version: u32,
    /// Match id.
    pub match_id: Uuid,
    /// Registry name of the game driving the match.
    pub game: String,
    /// Lifecycle state.
    pub lifecycle: MatchPhase,
    /// Applied lifecycle transitions.
    #[serde(default)]
    pub lifecycle_version: usize,
    /// Configuration recorded at initialize.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    /// Roster in join order.
    #[serde(default)]
    pub players: Vec<PlayerId>,
    /// Round and rotation state.
    #[serde(default)]
    pub rounds: Option<RoundRecord>,
    /// Scores.
    #[serde(default)]
    pub scoring: Option<ScoringRecord>,
    /// Role assignments, when the match uses roles.
    #[serde(default)]
    pub roles: Option<RoleRecord>,
    /// Submissions of the round in play.
    #[serde(default)]
    pub actions: Option<ActionTrackerRecord>,
    /// Phase running when the document was written.
    #[serde(default)]
    pub current_phase: Option<PhaseRecord>,
    /// Last phase epoch handed out.
    #[serde(default)]
    pub phase_epoch: u64,
    /// Game-owned state, opaque to the engine.
    #[serde(default)]
    pub game_data: Value,
}

/// Failure to read a stored document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Not valid JSON for any known layout.
    #[error("malformed match document: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Written by a newer build.
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u64),
}

/// Unversioned layout written before schema versioning: the rotation sat next to
/// the round state, phases had no epoch and the lifecycle was a single flag.
#[derive(Debug, Deserialize)]
struct LegacyMatchRecord {
    match_id: Uuid,
    game: String,
    #[serde(default)]
    players: Vec<PlayerId>,
    #[serde(default)]
    config: Option<EngineConfig>,
    round_state: LegacyRoundState,
    turn_system: TurnRecord,
    #[serde(default)]
    scores: IndexMap<PlayerId, i64>,
    #[serde(default)]
    score_history: Option<Vec<ScoreEvent>>,
    #[serde(default)]
    roles: Option<RoleRecord>,
    #[serde(default)]
    actions: Option<ActionTrackerRecord>,
    #[serde(default)]
    current_phase: Option<PhaseRecord>,
    #[serde(default)]
    game_data: Value,
    #[serde(default)]
    game_over: bool,
}

#[derive(Debug, Deserialize)]
struct LegacyRoundState {
    current_round: u32,
    #[serde(default)]
    total_rounds: u32,
    #[serde(default)]
    permanently_eliminated: BTreeSet<PlayerId>,
    #[serde(default)]
    temporarily_eliminated: BTreeSet<PlayerId>,
    #[serde(default)]
    round_start_index: usize,
}

impl From<LegacyMatchRecord> for MatchRecord {
    fn from(legacy: LegacyMatchRecord) -> Self {
        let lifecycle = if legacy.game_over {
            MatchPhase::Finished
        } else {
            MatchPhase::Playing
        };
        let phase_epoch = u64::from(legacy.current_phase.is_some());
        let current_phase = legacy.current_phase.map(|phase| PhaseRecord {
            epoch: phase_epoch,
            ..phase
        });
        let players = if legacy.players.is_empty() {
            legacy.turn_system.order.clone()
        } else {
            legacy.players
        };

        MatchRecord {
            schema_version: SCHEMA_VERSION,
            match_id: legacy.match_id,
            game: legacy.game,
            lifecycle,
            lifecycle_version: 0,
            config: legacy.config,
            players,
            rounds: Some(RoundRecord {
                current_round: legacy.round_state.current_round,
                total_rounds: legacy.round_state.total_rounds,
                permanently_eliminated: legacy.round_state.permanently_eliminated,
                temporarily_eliminated: legacy.round_state.temporarily_eliminated,
                round_start_index: legacy.round_state.round_start_index,
                turn_system: legacy.turn_system,
            }),
            scoring: Some(ScoringRecord {
                scores: legacy.scores,
                score_history: legacy.score_history,
            }),
            roles: legacy.roles,
            actions: legacy.actions,
            current_phase,
            phase_epoch,
            game_data: legacy.game_data,
        }
    }
}

/// Decode a stored document, migrating older layouts to the current one.
pub fn decode(document: &Value) -> Result<MatchRecord, SchemaError> {
    match document.get("schema_version").and_then(Value::as_u64) {
        None => {
            let legacy: LegacyMatchRecord = serde_json::from_value(document.clone())?;
            Ok(legacy.into())
        }
        Some(version) if version == u64::from(SCHEMA_VERSION) => {
            Ok(serde_json::from_value(document.clone())?)
        }
        Some(version) => Err(SchemaError::UnsupportedVersion(version)),
    }
}

/// Match id of a stored document, readable even when the rest is not.
pub fn document_id(document: &Value) -> Option<Uuid> {
    document
        .get("match_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn legacy_document(id: Uuid) -> Value {
        json!({
            "match_id": id,
            "game": "tally",
            "round_state": {
                "current_round": 2,
                "total_rounds": 5,
                "permanently_eliminated": [3],
                "round_start_index": 0
            },
            "turn_system": {
                "order": [1, 2, 3],
                "index": 1,
                "mode": "sequential",
                "paused": false,
                "direction": -1
            },
            "scores": { "1": 4, "2": 0, "3": 7 },
            "current_phase": {
                "name": "answer",
                "kind": "active",
                "duration_ms": 10000,
                "started_at": { "secs_since_epoch": 1_700_000_000u64, "nanos_since_epoch": 0 },
                "deadline": null
            }
        })
    }

    #[test]
    fn legacy_documents_are_migrated() {
        let id = Uuid::new_v4();
        let record = decode(&legacy_document(id)).unwrap();
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.match_id, id);
        assert_eq!(record.lifecycle, MatchPhase::Playing);
        assert_eq!(record.players, vec![1, 2, 3]);

        let rounds = record.rounds.unwrap();
        assert_eq!(rounds.current_round, 2);
        assert_eq!(rounds.turn_system.direction, Direction::Backward);
        assert!(rounds.permanently_eliminated.contains(&3));

        assert_eq!(record.scoring.unwrap().scores.get(&3), Some(&7));
        assert_eq!(record.current_phase.unwrap().epoch, 1);
        assert_eq!(record.phase_epoch, 1);
    }

    #[test]
    fn finished_legacy_match_stays_finished() {
        let mut document = legacy_document(Uuid::new_v4());
        document["game_over"] = json!(true);
        assert_eq!(decode(&document).unwrap().lifecycle, MatchPhase::Finished);
    }

    #[test]
    fn future_versions_are_refused() {
        let document = json!({ "schema_version": 7, "match_id": Uuid::new_v4() });
        assert!(matches!(
            decode(&document),
            Err(SchemaError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn garbage_is_malformed_but_keeps_its_id() {
        let id = Uuid::new_v4();
        let document = json!({ "schema_version": 2, "match_id": id, "lifecycle": 12 });
        assert!(matches!(decode(&document), Err(SchemaError::Malformed(_))));
        assert_eq!(document_id(&document), Some(id));
    }

    #[test]
    fn single_and_multi_roles_share_one_field() {
        let record: RoleRecord = serde_json::from_value(json!({
            "available_roles": ["drawer", "guesser"],
            "allow_multiple_roles": true,
            "player_roles": { "1": "drawer", "2": ["drawer", "guesser"] }
        }))
        .unwrap();
        assert_eq!(
            record.player_roles.get(&1),
            Some(&PlayerRoles::One("drawer".into()))
        );
        assert!(matches!(record.player_roles.get(&2), Some(PlayerRoles::Many(roles)) if roles.len() == 2));
    }
}
