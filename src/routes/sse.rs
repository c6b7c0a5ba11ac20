use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

/// Stream the notifications of one match, starting with a handshake.
pub async fn match_stream(
    State(state): State<SharedState>,
    Path(match_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe(&state, match_id).await?;
    info!(%match_id, "new match SSE connection");
    Ok(sse_service::to_sse_stream(
        receiver,
        state.degraded_watcher(),
        handshake,
        match_id,
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/matches/{id}/events", get(match_stream))
}
