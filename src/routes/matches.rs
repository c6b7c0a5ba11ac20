use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::matches::{ActionRequest, ActionResponse, CreateMatchRequest, MatchView},
    error::AppError,
    services::match_service,
    state::SharedState,
};

/// Routes driving the lifecycle of matches.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches", post(create_match))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/start", post(start_match))
        .route("/matches/{id}/actions", post(submit_action))
        .route("/matches/{id}/rounds/end", post(end_round))
        .route("/matches/{id}/finish", post(finish_match))
        .route("/matches/{id}/phases/{phase}/advance", post(advance_phase))
}

#[derive(Debug, Default, Deserialize)]
/// Optional body of a host-requested round end.
pub struct EndRoundRequest {
    /// Reported in `round.ended`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Create and configure a match of a registered game.
pub async fn create_match(
    State(state): State<SharedState>,
    Json(payload): Json<CreateMatchRequest>,
) -> Result<Json<MatchView>, AppError> {
    payload.validate()?;
    let view = match_service::create_match(&state, payload).await?;
    Ok(Json(view))
}

/// Current view of a match.
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(match_service::get_match(&state, id).await?))
}

/// Start a configured match.
pub async fn start_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(match_service::start_match(&state, id).await?))
}

/// Submit one player action.
pub async fn submit_action(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActionRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(match_service::submit_action(&state, id, payload).await?))
}

/// End the round in play.
pub async fn end_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<EndRoundRequest>>,
) -> Result<Json<MatchView>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    Ok(Json(match_service::end_round(&state, id, reason).await?))
}

/// Finish the match and publish the standings.
pub async fn finish_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(match_service::finish_match(&state, id).await?))
}

/// Advance an externally driven phase.
pub async fn advance_phase(
    State(state): State<SharedState>,
    Path((id, phase)): Path<(Uuid, String)>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(match_service::advance_phase(&state, id, &phase).await?))
}
