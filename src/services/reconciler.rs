//! Keeps stored match documents in line with the live matches.
//!
//! At startup every stored document is rehydrated into a live match, or halted
//! when it cannot be read. Afterwards a periodic pass re-persists matches whose
//! stored document drifted, and toggles degraded mode with the store's health.

use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{
        schema::{self, MatchRecord},
        storage::StorageResult,
    },
    engine::game::GameEngine,
    error::EngineError,
    services::match_service,
    state::{MatchHandle, SharedState},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Counts reported by [`rehydrate`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rehydration {
    /// Matches brought back to life.
    pub restored: usize,
    /// Matches whose document could not be trusted.
    pub halted: usize,
}

/// Watch the store, re-persisting drifted matches while it is healthy and
/// keeping the shared state in degraded mode while it is not.
pub async fn run(state: SharedState) {
    let mut delay = INITIAL_DELAY;

    loop {
        match state.store().health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                delay = INITIAL_DELAY;

                match reconcile(&state).await {
                    Ok(0) => {}
                    Ok(repaired) => info!(repaired, "re-persisted drifted matches"),
                    Err(err) => warn!(error = %err, "reconciliation pass failed"),
                }
                sleep(state.config().reconcile_interval).await;
            }
            Err(err) => {
                if state.is_degraded() {
                    warn!(error = %err, "storage still unavailable");
                } else {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    state.update_degraded(true);
                }
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Load every stored document, restoring the readable ones and halting the rest.
pub async fn rehydrate(state: &SharedState) -> StorageResult<Rehydration> {
    let documents = state.store().list_matches().await?;
    let mut outcome = Rehydration::default();

    for document in documents {
        let Some(match_id) = schema::document_id(&document) else {
            error!("stored match document has no readable id; skipping it");
            continue;
        };

        let engine = match restore(state, &document) {
            Ok(engine) => engine,
            Err(err) => {
                error!(%match_id, error = %err, "halting match with unreadable state");
                state.halt(match_id, err.to_string());
                outcome.halted += 1;
                continue;
            }
        };

        let handle = state.insert_match(MatchHandle::new(engine, state.config().event_capacity));
        let mut engine = handle.engine().lock().await;
        engine.resume_timers(SystemTime::now());
        if let Err(err) = match_service::commit(state, &handle, &mut engine).await {
            warn!(%match_id, error = %err, "failed to persist rehydrated match");
        }
        info!(%match_id, status = ?engine.phase(), "match rehydrated");
        outcome.restored += 1;
    }

    Ok(outcome)
}

/// Re-persist every live match whose stored document differs from memory.
pub async fn reconcile(state: &SharedState) -> StorageResult<usize> {
    let mut repaired = 0;

    for match_id in state.match_ids() {
        let Some(handle) = state.get_match(match_id) else {
            continue;
        };
        let engine = handle.engine().lock().await;
        let Ok(expected) = serde_json::to_value(engine.to_record()) else {
            continue;
        };

        let stored = state.store().find_match(match_id).await?;
        if stored.as_ref() == Some(&expected) {
            continue;
        }

        warn!(%match_id, "stored match drifted from memory; re-persisting");
        match_service::persist(state, &engine).await?;
        repaired += 1;
    }

    Ok(repaired)
}

fn restore(state: &SharedState, document: &Value) -> Result<GameEngine, EngineError> {
    let record: MatchRecord =
        schema::decode(document).map_err(|err| EngineError::CorruptState(err.to_string()))?;
    let rules = state.games().get(&record.game).ok_or_else(|| {
        EngineError::CorruptState(format!("game `{}` is not registered", record.game))
    })?;
    GameEngine::restore(record, rules)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{AppConfig, EngineConfig},
        dao::match_store::{MatchStore, MemoryMatchStore},
        dto::matches::CreateMatchRequest,
        engine::{lifecycle::MatchPhase, turn::TurnMode},
        games::GameRegistry,
        state::AppState,
    };

    fn state_with(store: &MemoryMatchStore) -> SharedState {
        AppState::new(
            AppConfig::default(),
            GameRegistry::builtin(),
            Arc::new(store.clone()),
        )
    }

    async fn started_match(state: &SharedState) -> Uuid {
        let view = match_service::create_match(
            state,
            CreateMatchRequest {
                game: "tally".into(),
                players: vec![1, 2],
                config: Some(EngineConfig {
                    turn_mode: TurnMode::Simultaneous,
                    ..EngineConfig::default()
                }),
            },
        )
        .await
        .unwrap();
        match_service::start_match(state, view.match_id).await.unwrap();
        view.match_id
    }

    #[tokio::test]
    async fn readable_matches_come_back_and_corrupt_ones_halt() {
        let store = MemoryMatchStore::new();
        let match_id = started_match(&state_with(&store)).await;
        let corrupt_id = Uuid::new_v4();
        let corrupt = json!({ "schema_version": 99, "match_id": corrupt_id });
        store.save_match(corrupt_id, corrupt.clone()).await.unwrap();

        let state = state_with(&store);
        let outcome = rehydrate(&state).await.unwrap();
        assert_eq!(outcome, Rehydration { restored: 1, halted: 1 });

        let view = match_service::get_match(&state, match_id).await.unwrap();
        assert_eq!(view.status, MatchPhase::Playing);
        assert_eq!(view.players, vec![1, 2]);
        assert!(state.halted_reason(corrupt_id).is_some());
        assert_eq!(store.find_match(corrupt_id).await.unwrap(), Some(corrupt));
    }

    #[tokio::test]
    async fn foreign_games_are_halted() {
        let store = MemoryMatchStore::new();
        let match_id = started_match(&state_with(&store)).await;

        let state = AppState::new(
            AppConfig::default(),
            GameRegistry::new(),
            Arc::new(store.clone()),
        );
        let outcome = rehydrate(&state).await.unwrap();
        assert_eq!(outcome, Rehydration { restored: 0, halted: 1 });
        assert!(state.halted_reason(match_id).unwrap().contains("tally"));
    }

    #[tokio::test]
    async fn drifted_documents_are_rewritten() {
        let store = MemoryMatchStore::new();
        let state = state_with(&store);
        let match_id = started_match(&state).await;
        assert_eq!(reconcile(&state).await.unwrap(), 0);

        store.save_match(match_id, json!({})).await.unwrap();
        assert_eq!(reconcile(&state).await.unwrap(), 1);
        let stored = store.find_match(match_id).await.unwrap().unwrap();
        assert_eq!(stored["lifecycle"], "playing");
    }
}
