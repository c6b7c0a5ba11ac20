use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    dto::format_system_time,
    engine::{
        PlayerId,
        actions::RecordedAction,
        lifecycle::MatchPhase,
        notifications::MatchNotification,
        scoring::{RankEntry, ScoreStatistics},
    },
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; unnamed events reach the default `message` listener.
    pub event: Option<String>,
    /// JSON-encoded payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Match the stream belongs to.
    pub match_id: Uuid,
    /// Lifecycle state at subscription time.
    pub status: MatchPhase,
    /// Lifecycle version at subscription time.
    pub version: usize,
    /// Whether writes are currently failing; state may be lost on restart.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
/// Broadcast when the server enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether writes are currently failing.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
/// Payload of `round.started`.
pub struct RoundStartedEvent {
    /// Round that began.
    pub round: u32,
}

#[derive(Debug, Serialize)]
/// Scores and submissions of a round that just ended.
pub struct RoundEndedEvent<'a> {
    /// Round that ended.
    pub round: u32,
    /// Why it ended, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    /// Scores after the round.
    pub scores: &'a IndexMap<PlayerId, i64>,
    /// Recorded actions of the round.
    pub results: &'a IndexMap<PlayerId, RecordedAction>,
}

#[derive(Debug, Serialize)]
/// Payload of `turn.changed`.
pub struct TurnChangedEvent {
    /// Round still in play.
    pub round: u32,
    /// Player whose turn it is.
    pub player_id: PlayerId,
}

#[derive(Debug, Serialize)]
/// Payload of `phase.started`.
pub struct PhaseStartedEvent<'a> {
    /// Phase name.
    pub phase: &'a str,
    /// Phase length, for timed phases.
    pub duration_ms: Option<u64>,
    /// RFC 3339 expiry instant.
    pub deadline: Option<String>,
}

#[derive(Debug, Serialize)]
/// Payload of `phase.ended`.
pub struct PhaseEndedEvent<'a> {
    /// Phase name.
    pub phase: &'a str,
}

#[derive(Debug, Serialize)]
/// Payload of `player.locked`.
pub struct PlayerLockedEvent {
    /// Player whose action was recorded.
    pub player_id: PlayerId,
}

#[derive(Debug, Serialize)]
/// Payload of `player.unlocked`.
pub struct PlayersUnlockedEvent {
    /// Round the unlock opens.
    pub round: u32,
}

#[derive(Debug, Serialize)]
/// Payload of `game.finished`.
pub struct GameFinishedEvent<'a> {
    /// Final standings.
    pub ranking: &'a [RankEntry],
    /// Final scores.
    pub scores: &'a IndexMap<PlayerId, i64>,
    /// Aggregate figures.
    pub statistics: &'a ScoreStatistics,
}

impl ServerEvent {
    /// Wire form of an engine notification, named after it.
    pub fn from_notification(notification: &MatchNotification) -> serde_json::Result<Self> {
        let name = Some(notification.name().to_string());
        match notification {
            MatchNotification::RoundStarted { round } => {
                Self::json(name, &RoundStartedEvent { round: *round })
            }
            MatchNotification::RoundEnded {
                round,
                reason,
                scores,
                results,
            } => Self::json(
                name,
                &RoundEndedEvent {
                    round: *round,
                    reason: reason.as_deref(),
                    scores,
                    results,
                },
            ),
            MatchNotification::TurnChanged { round, player_id } => Self::json(
                name,
                &TurnChangedEvent {
                    round: *round,
                    player_id: *player_id,
                },
            ),
            MatchNotification::PhaseStarted {
                phase,
                duration,
                deadline,
            } => Self::json(
                name,
                &PhaseStartedEvent {
                    phase,
                    duration_ms: duration
                        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
                    deadline: deadline.map(format_system_time),
                },
            ),
            MatchNotification::PhaseEnded { phase } => Self::json(name, &PhaseEndedEvent { phase }),
            MatchNotification::PlayerLocked { player_id } => Self::json(
                name,
                &PlayerLockedEvent {
                    player_id: *player_id,
                },
            ),
            MatchNotification::PlayersUnlocked { round } => {
                Self::json(name, &PlayersUnlockedEvent { round: *round })
            }
            MatchNotification::GameFinished {
                ranking,
                scores,
                statistics,
            } => Self::json(
                name,
                &GameFinishedEvent {
                    ranking,
                    scores,
                    statistics,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn phase_started_carries_milliseconds_and_rfc3339_deadline() {
        let deadline = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        let event = ServerEvent::from_notification(&MatchNotification::PhaseStarted {
            phase: "draw".into(),
            duration: Some(Duration::from_secs(60)),
            deadline: Some(deadline),
        })
        .unwrap();
        assert_eq!(event.event.as_deref(), Some("phase.started"));
        let data: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(
            data,
            json!({
                "phase": "draw",
                "duration_ms": 60000,
                "deadline": "1970-01-01T00:01:00Z"
            })
        );
    }

    #[test]
    fn round_ended_lists_scores_by_player() {
        let scores: IndexMap<PlayerId, i64> = [(1, 3), (2, 0)].into_iter().collect();
        let event = ServerEvent::from_notification(&MatchNotification::RoundEnded {
            round: 1,
            reason: None,
            scores,
            results: IndexMap::new(),
        })
        .unwrap();
        let data: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data, json!({ "round": 1, "scores": { "1": 3, "2": 0 }, "results": {} }));
    }
}
