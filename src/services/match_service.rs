use std::{sync::Arc, time::SystemTime};

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::storage::{StorageError, StorageResult},
    dto::matches::{ActionRequest, ActionResponse, CreateMatchRequest, MatchView},
    engine::{
        effects::Signal,
        game::{GameEngine, MatchSetup},
    },
    error::{EngineError, ServiceError},
    services::{event_service, scheduler},
    state::{LockGuard, LockKey, MatchHandle, SharedState},
};

/// Configure a new match of a registered game and persist it.
pub async fn create_match(
    state: &SharedState,
    request: CreateMatchRequest,
) -> Result<MatchView, ServiceError> {
    let CreateMatchRequest {
        game,
        players,
        config,
    } = request;
    let rules = state
        .games()
        .get(&game)
        .ok_or_else(|| ServiceError::NotFound(format!("game `{game}` is not registered")))?;

    let match_id = Uuid::new_v4();
    let mut engine = GameEngine::new(match_id, rules);
    engine.initialize(MatchSetup {
        players,
        config: config.unwrap_or_else(|| state.config().engine.clone()),
    })?;

    let handle = state.insert_match(MatchHandle::new(engine, state.config().event_capacity));
    let mut engine = handle.engine().lock().await;
    if let Err(err) = commit(state, &handle, &mut engine).await {
        state.remove_match(match_id);
        return Err(err.into());
    }

    info!(%match_id, game = %game, "match created");
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// Current view of a live match.
pub async fn get_match(state: &SharedState, match_id: Uuid) -> Result<MatchView, ServiceError> {
    let handle = live_match(state, match_id)?;
    let engine = handle.engine().lock().await;
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// Leave configuration and open round 1.
pub async fn start_match(state: &SharedState, match_id: Uuid) -> Result<MatchView, ServiceError> {
    let _guard = claim(state, LockKey::for_match(match_id))?;
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    engine.start_game()?;
    settle(state, &handle, &mut engine).await;
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// Hand one player action to the engine.
pub async fn submit_action(
    state: &SharedState,
    match_id: Uuid,
    request: ActionRequest,
) -> Result<ActionResponse, ServiceError> {
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    let report = engine.process_round_action(request.player_id, request.payload)?;
    debug!(
        %match_id,
        player_id = request.player_id,
        success = report.outcome.success,
        ended = report.decision.should_end,
        "action processed"
    );
    settle(state, &handle, &mut engine).await;
    Ok(report.into())
}

/// Close the round in play on the host's request.
pub async fn end_round(
    state: &SharedState,
    match_id: Uuid,
    reason: Option<String>,
) -> Result<MatchView, ServiceError> {
    let _guard = claim(state, LockKey::for_match(match_id))?;
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    engine.end_current_round(reason)?;
    settle(state, &handle, &mut engine).await;
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// Finish the match early and publish the standings.
pub async fn finish_match(state: &SharedState, match_id: Uuid) -> Result<MatchView, ServiceError> {
    let _guard = claim(state, LockKey::for_match(match_id))?;
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    engine.finalize()?;
    settle(state, &handle, &mut engine).await;
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// End an externally driven phase, provided it is still the current one.
pub async fn advance_phase(
    state: &SharedState,
    match_id: Uuid,
    phase: &str,
) -> Result<MatchView, ServiceError> {
    let _guard = claim(state, LockKey::for_phase(match_id, phase))?;
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    engine.advance_phase(phase)?;
    settle(state, &handle, &mut engine).await;
    Ok(MatchView::from_engine(&engine, SystemTime::now()))
}

/// Deliver a deferred signal.
///
/// The scoped lock is taken before the engine re-checks the signal, so two
/// deliveries of one expiry can never both pass the check.
pub async fn handle_signal(
    state: &SharedState,
    match_id: Uuid,
    signal: &Signal,
) -> Result<(), ServiceError> {
    let key = match signal {
        Signal::PhaseExpired { phase, .. } => LockKey::for_phase(match_id, phase.as_str()),
        Signal::StartRound { .. } => LockKey::for_match(match_id),
    };
    let _guard = claim(state, key)?;
    let handle = live_match(state, match_id)?;
    let mut engine = handle.engine().lock().await;
    engine.handle_signal(signal)?;
    settle(state, &handle, &mut engine).await;
    Ok(())
}

/// Publish, schedule and persist whatever the last engine call queued.
pub(crate) async fn commit(
    state: &SharedState,
    handle: &MatchHandle,
    engine: &mut GameEngine,
) -> StorageResult<()> {
    let (notifications, deferred) = engine.take_effects();
    let persisted = persist(state, engine).await;

    event_service::publish(handle, &notifications);
    for signal in deferred {
        scheduler::schedule(state, signal);
    }
    persisted
}

/// Write the match document, bounded by the store timeout.
pub(crate) async fn persist(state: &SharedState, engine: &GameEngine) -> StorageResult<()> {
    let match_id = engine.match_id();
    let document = serde_json::to_value(engine.to_record())
        .map_err(|err| StorageError::Encoding(match_id, err))?;

    match timeout(
        state.store_timeout(),
        state.store().save_match(match_id, document),
    )
    .await
    {
        Ok(result) => result,
        Err(elapsed) => Err(StorageError::unavailable(
            format!("saving match {match_id} timed out"),
            elapsed,
        )),
    }
}

/// Commit after a successful call; a failed write is left to the reconciler.
async fn settle(state: &SharedState, handle: &MatchHandle, engine: &mut GameEngine) {
    if let Err(err) = commit(state, handle, engine).await {
        warn!(
            match_id = %handle.match_id(),
            error = %err,
            "failed to persist match; entering degraded mode"
        );
        state.update_degraded(true);
    }
}

/// Live match, or why it cannot be used.
pub(crate) fn live_match(state: &SharedState, match_id: Uuid) -> Result<Arc<MatchHandle>, ServiceError> {
    if let Some(reason) = state.halted_reason(match_id) {
        return Err(ServiceError::Halted(format!("match `{match_id}`: {reason}")));
    }
    state
        .get_match(match_id)
        .ok_or_else(|| ServiceError::NotFound(format!("match `{match_id}` not found")))
}

fn claim(state: &SharedState, key: LockKey) -> Result<LockGuard, ServiceError> {
    let scope = match &key.phase {
        Some(phase) => format!("phase `{phase}` of match `{}`", key.match_id),
        None => format!("match `{}`", key.match_id),
    };
    state
        .locks()
        .try_acquire(key)
        .ok_or_else(|| EngineError::ConcurrencyConflict(scope).into())
}
