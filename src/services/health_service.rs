use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report store reachability along with match counts, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    if let Err(err) = state.store().health_check().await {
        warn!(error = %err, "storage health check failed");
        state.update_degraded(true);
    }

    let (live, halted) = (state.live_count(), state.halted_count());
    if state.is_degraded() {
        HealthResponse::degraded(live, halted)
    } else {
        HealthResponse::ok(live, halted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::match_store::MemoryMatchStore, games::GameRegistry,
        state::AppState,
    };

    #[tokio::test]
    async fn offline_store_reports_degraded() {
        let store = MemoryMatchStore::new();
        let state = AppState::new(
            AppConfig::default(),
            GameRegistry::builtin(),
            Arc::new(store.clone()),
        );
        assert_eq!(health_status(&state).await.status, "ok");

        store.set_offline(true);
        let response = health_status(&state).await;
        assert_eq!(response.status, "degraded");
        assert!(state.is_degraded());
    }
}
