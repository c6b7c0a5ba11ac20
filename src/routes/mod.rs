use axum::Router;

use crate::state::SharedState;

/// `GET /health`.
pub mod health;
/// Match creation and play.
pub mod matches;
/// Match event streams.
pub mod sse;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(matches::router())
        .merge(sse::router())
        .with_state(state)
}
