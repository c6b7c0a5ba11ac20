//! Running scores, ranking and the pluggable point calculators.

use std::{fmt::Debug, sync::Arc, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    dao::schema::ScoringRecord,
    engine::PlayerId,
    error::{EngineError, EngineResult},
};

/// Event name recorded in the history for deductions.
pub const PENALTY_EVENT: &str = "penalty";
/// Event name recorded in the history for direct score overrides.
pub const SET_EVENT: &str = "set";

/// Turns a scoring event and its context into a point delta.
pub trait ScoreCalculator: Send + Sync + Debug {
    /// Points earned for `event_type` given the game-supplied `context`.
    fn calculate(&self, event_type: &str, context: &Value) -> i64;
    /// Static configuration of the calculator, for introspection.
    fn config(&self) -> Map<String, Value>;
    /// Whether the calculator knows how to score `event_type`.
    fn supports_event(&self, event_type: &str) -> bool;
}

/// Returns `context.points` for any event.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughCalculator;

impl ScoreCalculator for PassThroughCalculator {
    fn calculate(&self, _event_type: &str, context: &Value) -> i64 {
        context.get("points").and_then(Value::as_i64).unwrap_or(0)
    }

    fn config(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("kind".into(), json!("pass_through"));
        config
    }

    fn supports_event(&self, _event_type: &str) -> bool {
        true
    }
}

/// Fixed points per event name, scaled by an optional integer `multiplier` in the context.
#[derive(Debug, Clone, Default)]
pub struct PointsTableCalculator {
    table: IndexMap<String, i64>,
}

impl PointsTableCalculator {
    /// Build a calculator from `event -> points` entries.
    pub fn new(table: IndexMap<String, i64>) -> Self {
        Self { table }
    }
}

impl ScoreCalculator for PointsTableCalculator {
    fn calculate(&self, event_type: &str, context: &Value) -> i64 {
        let Some(points) = self.table.get(event_type) else {
            return 0;
        };
        let multiplier = context
            .get("multiplier")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        points.saturating_mul(multiplier)
    }

    fn config(&self) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("kind".into(), json!("points_table"));
        config.insert("table".into(), json!(self.table));
        config
    }

    fn supports_event(&self, event_type: &str) -> bool {
        self.table.contains_key(event_type)
    }
}

/// Calculator selection stored in a match configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculatorKind {
    /// See [`PassThroughCalculator`].
    #[default]
    PassThrough,
    /// See [`PointsTableCalculator`].
    PointsTable {
        /// Points awarded per event name.
        table: IndexMap<String, i64>,
    },
}

impl CalculatorKind {
    /// Instantiate the selected calculator.
    pub fn build(&self) -> Arc<dyn ScoreCalculator> {
        match self {
            CalculatorKind::PassThrough => Arc::new(PassThroughCalculator),
            CalculatorKind::PointsTable { table } => {
                Arc::new(PointsTableCalculator::new(table.clone()))
            }
        }
    }
}

/// One entry of the score history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    /// Player whose score changed.
    pub player_id: PlayerId,
    /// Scoring event name.
    pub event_type: String,
    /// Requested delta (negative for penalties).
    pub points: i64,
    /// Score right after the change.
    pub total_after: i64,
    /// Game-supplied context the delta was computed from.
    pub context: Value,
    /// When the change happened.
    pub timestamp: SystemTime,
}

/// A player's position in the ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    /// 1-based rank; tied players share a rank.
    pub rank: usize,
    /// Ranked player.
    pub player_id: PlayerId,
    /// Player score.
    pub score: i64,
}

/// Aggregate figures over every score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStatistics {
    /// Number of players.
    pub count: usize,
    /// Sum of every score.
    pub sum: i64,
    /// Mean score rounded to two decimals.
    pub average: f64,
    /// Highest score.
    pub max: i64,
    /// Lowest score.
    pub min: i64,
}

/// Per-player running scores, kept in roster order.
#[derive(Debug, Clone)]
pub struct ScoreManager {
    scores: IndexMap<PlayerId, i64>,
    history: Option<Vec<ScoreEvent>>,
    calculator: Arc<dyn ScoreCalculator>,
}

impl ScoreManager {
    /// Seed every roster entry with 0 points.
    pub fn new(
        roster: &[PlayerId],
        calculator: Arc<dyn ScoreCalculator>,
        track_history: bool,
    ) -> EngineResult<Self> {
        if roster.is_empty() {
            return Err(EngineError::Configuration(
                "score manager requires at least one player".into(),
            ));
        }

        Ok(Self {
            scores: roster.iter().map(|id| (*id, 0)).collect(),
            history: track_history.then(Vec::new),
            calculator,
        })
    }

    /// Add the calculator's delta for `event_type` and return the new total.
    pub fn award_points(
        &mut self,
        player_id: PlayerId,
        event_type: &str,
        context: Value,
    ) -> EngineResult<i64> {
        let points = self.calculator.calculate(event_type, &context);
        let score = self.score_mut(player_id)?;
        *score = score.saturating_add(points).max(0);
        let total_after = *score;
        self.record(player_id, event_type, points, total_after, context);
        Ok(total_after)
    }

    /// Subtract `amount` points, never going below zero, and return the new total.
    pub fn deduct_points(&mut self, player_id: PlayerId, amount: u32) -> EngineResult<i64> {
        let score = self.score_mut(player_id)?;
        *score = (*score - i64::from(amount)).max(0);
        let total_after = *score;
        self.record(
            player_id,
            PENALTY_EVENT,
            -i64::from(amount),
            total_after,
            json!({ "amount": amount }),
        );
        Ok(total_after)
    }

    /// Override a score. Negative values are clamped to zero.
    pub fn set_score(&mut self, player_id: PlayerId, value: i64) -> EngineResult<i64> {
        let score = self.score_mut(player_id)?;
        let previous = *score;
        *score = value.max(0);
        let total_after = *score;
        self.record(
            player_id,
            SET_EVENT,
            total_after - previous,
            total_after,
            Value::Null,
        );
        Ok(total_after)
    }

    fn score_mut(&mut self, player_id: PlayerId) -> EngineResult<&mut i64> {
        self.scores
            .get_mut(&player_id)
            .ok_or(EngineError::UnknownPlayer(player_id))
    }

    fn record(
        &mut self,
        player_id: PlayerId,
        event_type: &str,
        points: i64,
        total_after: i64,
        context: Value,
    ) {
        if let Some(history) = self.history.as_mut() {
            history.push(ScoreEvent {
                player_id,
                event_type: event_type.to_string(),
                points,
                total_after,
                context,
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Score of one player, if they are on the roster.
    pub fn score(&self, player_id: PlayerId) -> Option<i64> {
        self.scores.get(&player_id).copied()
    }

    /// Every score, in roster order.
    pub fn scores(&self) -> &IndexMap<PlayerId, i64> {
        &self.scores
    }

    /// Players by descending score; ties keep roster order and share a rank.
    pub fn ranking(&self) -> Vec<RankEntry> {
        let mut sorted: Vec<(PlayerId, i64)> =
            self.scores.iter().map(|(id, score)| (*id, *score)).collect();
        // `sort_by` is stable, so equal scores stay in roster order.
        sorted.sort_by(|a, b| b.1.cmp(&a.1));

        let mut ranking = Vec::with_capacity(sorted.len());
        for (position, (player_id, score)) in sorted.into_iter().enumerate() {
            let rank = match ranking.last() {
                Some(RankEntry {
                    rank,
                    score: previous,
                    ..
                }) if *previous == score => *rank,
                _ => position + 1,
            };
            ranking.push(RankEntry {
                rank,
                player_id,
                score,
            });
        }
        ranking
    }

    /// The single top scorer, or `None` when the top score is shared.
    pub fn winner(&self) -> Option<RankEntry> {
        let mut winners = self.winners();
        if winners.len() == 1 { winners.pop() } else { None }
    }

    /// Every player sharing the top score.
    pub fn winners(&self) -> Vec<RankEntry> {
        self.ranking()
            .into_iter()
            .take_while(|entry| entry.rank == 1)
            .collect()
    }

    /// Count, sum, average, max and min over every score.
    pub fn statistics(&self) -> ScoreStatistics {
        let count = self.scores.len();
        let sum: i64 = self.scores.values().sum();
        let average = if count == 0 {
            0.0
        } else {
            (sum as f64 / count as f64 * 100.0).round() / 100.0
        };

        ScoreStatistics {
            count,
            sum,
            average,
            max: self.scores.values().copied().max().unwrap_or(0),
            min: self.scores.values().copied().min().unwrap_or(0),
        }
    }

    /// Add a late joiner with 0 points. Returns false if already on the roster.
    pub fn add_player(&mut self, player_id: PlayerId) -> bool {
        if self.scores.contains_key(&player_id) {
            return false;
        }
        self.scores.insert(player_id, 0);
        true
    }

    /// Drop a player, keeping the remaining roster order.
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        self.scores.shift_remove(&player_id).is_some()
    }

    /// Zero every score and clear the history.
    pub fn reset(&mut self) {
        self.scores.values_mut().for_each(|score| *score = 0);
        if let Some(history) = self.history.as_mut() {
            history.clear();
        }
    }

    /// Full history, when tracking is enabled.
    pub fn history(&self) -> Option<&[ScoreEvent]> {
        self.history.as_deref()
    }

    /// History entries of one player, oldest first.
    pub fn player_history(&self, player_id: PlayerId) -> Vec<&ScoreEvent> {
        self.history
            .iter()
            .flatten()
            .filter(|event| event.player_id == player_id)
            .collect()
    }

    /// Calculator in use.
    pub fn calculator(&self) -> &Arc<dyn ScoreCalculator> {
        &self.calculator
    }

    /// Persistable view of the scores.
    pub fn to_record(&self) -> ScoringRecord {
        ScoringRecord {
            scores: self.scores.clone(),
            score_history: self.history.clone(),
        }
    }

    /// Rebuild scores from a record, reattaching the match's calculator.
    pub fn from_record(
        record: ScoringRecord,
        calculator: Arc<dyn ScoreCalculator>,
    ) -> EngineResult<Self> {
        if let Some((player_id, score)) = record.scores.iter().find(|(_, score)| **score < 0) {
            return Err(EngineError::CorruptState(format!(
                "negative score {score} for player {player_id}"
            )));
        }

        Ok(Self {
            scores: record.scores,
            history: record.score_history,
            calculator,
        })
    }
}
