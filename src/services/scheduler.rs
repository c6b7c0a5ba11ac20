use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    engine::effects::DeferredSignal,
    error::{EngineError, ServiceError},
    services::match_service,
    state::SharedState,
};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// How a deferred signal ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The engine applied the signal.
    Applied,
    /// The signal no longer applied and was dropped quietly.
    Discarded,
    /// Every attempt failed; the match was left unchanged.
    Exhausted,
}

/// Deliver `deferred` after its delay, on an independent task.
pub fn schedule(state: &SharedState, deferred: DeferredSignal) {
    let state = state.clone();
    tokio::spawn(async move {
        sleep(deferred.delay).await;
        deliver(&state, &deferred).await;
    });
}

/// Hand the signal to its match, retrying with exponential backoff.
///
/// A busy match is retried like any other failure; only signals the match has
/// moved past, or whose match is gone, end delivery early.
pub async fn deliver(state: &SharedState, deferred: &DeferredSignal) -> Delivery {
    let max_attempts = state.config().signal_max_attempts.max(1);
    let mut delay = state.config().signal_retry_delay;
    let match_id = deferred.match_id;

    for attempt in 1..=max_attempts {
        match match_service::handle_signal(state, match_id, &deferred.signal).await {
            Ok(()) => return Delivery::Applied,
            Err(ServiceError::Engine(EngineError::ConcurrencyConflict(scope))) => {
                debug!(%match_id, attempt, signal = ?deferred.signal, %scope, "signal target busy");
            }
            Err(err) if err.is_absorbed() => {
                debug!(%match_id, signal = ?deferred.signal, error = %err, "signal absorbed");
                return Delivery::Discarded;
            }
            Err(err @ (ServiceError::NotFound(_) | ServiceError::Halted(_))) => {
                debug!(%match_id, signal = ?deferred.signal, error = %err, "signal target gone");
                return Delivery::Discarded;
            }
            Err(err) => {
                warn!(
                    %match_id,
                    attempt,
                    signal = ?deferred.signal,
                    error = %err,
                    "signal delivery failed"
                );
            }
        }

        if attempt < max_attempts {
            sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }

    warn!(
        %match_id,
        signal = ?deferred.signal,
        "exhausted signal delivery attempts; dropping signal"
    );
    Delivery::Exhausted
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        config::{AppConfig, EngineConfig},
        dao::match_store::MemoryMatchStore,
        dto::matches::{ActionRequest, CreateMatchRequest},
        engine::{
            PlayerId,
            effects::Signal,
            hooks::{ActionOutcome, GameRules, MatchContext, PhaseDirective},
            lifecycle::MatchPhase,
            phase::{PhaseKind, PhaseSpec},
            turn::TurnMode,
        },
        error::EngineResult,
        games::GameRegistry,
        state::{AppState, LockKey},
    };

    /// Phase hooks fail until `failures` calls have been made.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl GameRules for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn process_round_action(
            &self,
            _ctx: &mut MatchContext,
            _player_id: PlayerId,
            _payload: &Value,
        ) -> EngineResult<ActionOutcome> {
            Ok(ActionOutcome::accepted(json!({})))
        }

        fn on_phase_end(
            &self,
            _ctx: &mut MatchContext,
            _phase: &str,
            _callback: &str,
        ) -> EngineResult<PhaseDirective> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(EngineError::invalid("phase hook unavailable"))
            } else {
                Ok(PhaseDirective::Next)
            }
        }
    }

    async fn flaky_match(
        failures: u32,
        max_attempts: u32,
    ) -> (SharedState, DeferredSignal, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut games = GameRegistry::new();
        games.register(Arc::new(Flaky {
            failures,
            calls: Arc::clone(&calls),
        }));
        let config = AppConfig {
            signal_max_attempts: max_attempts,
            signal_retry_delay: Duration::from_millis(1),
            ..AppConfig::default()
        };
        let state = AppState::new(config, games, Arc::new(MemoryMatchStore::new()));

        let request = CreateMatchRequest {
            game: "flaky".into(),
            players: vec![1, 2],
            config: Some(EngineConfig {
                turn_mode: TurnMode::Free,
                phases: vec![
                    PhaseSpec::timed("draw", PhaseKind::Active, Duration::from_secs(3600)),
                    PhaseSpec::untimed("reveal", PhaseKind::Scoring),
                ],
                ..EngineConfig::default()
            }),
        };
        let match_id = match_service::create_match(&state, request)
            .await
            .unwrap()
            .match_id;
        match_service::start_match(&state, match_id).await.unwrap();

        let deferred = DeferredSignal {
            match_id,
            delay: Duration::ZERO,
            signal: Signal::PhaseExpired {
                phase: "draw".into(),
                epoch: 1,
            },
        };
        (state, deferred, calls)
    }

    async fn current_phase(state: &SharedState, deferred: &DeferredSignal) -> Option<String> {
        let handle = state.get_match(deferred.match_id).unwrap();
        let engine = handle.engine().lock().await;
        engine
            .context()
            .and_then(|ctx| ctx.phases.current())
            .map(|record| record.name.clone())
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (state, deferred, calls) = flaky_match(2, 5).await;
        assert_eq!(deliver(&state, &deferred).await, Delivery::Applied);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(current_phase(&state, &deferred).await.as_deref(), Some("reveal"));
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_match_unchanged() {
        let (state, deferred, calls) = flaky_match(u32::MAX, 2).await;
        assert_eq!(deliver(&state, &deferred).await, Delivery::Exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(current_phase(&state, &deferred).await.as_deref(), Some("draw"));
    }

    #[tokio::test]
    async fn stale_signals_are_discarded_at_once() {
        let (state, mut deferred, calls) = flaky_match(0, 5).await;
        deferred.signal = Signal::PhaseExpired {
            phase: "draw".into(),
            epoch: 7,
        };
        assert_eq!(deliver(&state, &deferred).await, Delivery::Discarded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        deferred.match_id = uuid::Uuid::new_v4();
        assert_eq!(deliver(&state, &deferred).await, Delivery::Discarded);
    }

    /// A one-player tally match whose round just ended, with its round-start signal.
    async fn ending_round(retry_delay: Duration) -> (SharedState, DeferredSignal) {
        let config = AppConfig {
            signal_max_attempts: 5,
            signal_retry_delay: retry_delay,
            ..AppConfig::default()
        };
        let state = AppState::new(
            config,
            GameRegistry::builtin(),
            Arc::new(MemoryMatchStore::new()),
        );
        let request = CreateMatchRequest {
            game: "tally".into(),
            players: vec![1],
            config: Some(EngineConfig {
                turn_mode: TurnMode::Simultaneous,
                round_end_delay: Duration::from_secs(3600),
                ..EngineConfig::default()
            }),
        };
        let match_id = match_service::create_match(&state, request)
            .await
            .unwrap()
            .match_id;
        match_service::start_match(&state, match_id).await.unwrap();
        match_service::submit_action(
            &state,
            match_id,
            ActionRequest {
                player_id: 1,
                payload: json!({ "points": 1 }),
            },
        )
        .await
        .unwrap();

        let handle = state.get_match(match_id).unwrap();
        let engine = handle.engine().lock().await;
        assert_eq!(engine.phase(), MatchPhase::RoundEnding);
        let deferred = DeferredSignal {
            match_id,
            delay: Duration::ZERO,
            signal: Signal::StartRound {
                round: 2,
                version: engine.version(),
            },
        };
        drop(engine);
        (state, deferred)
    }

    #[tokio::test(start_paused = true)]
    async fn busy_matches_are_retried_until_the_lock_frees() {
        let (state, deferred) = ending_round(Duration::from_millis(10)).await;
        let guard = state
            .locks()
            .try_acquire(LockKey::for_match(deferred.match_id))
            .unwrap();

        let delivery = {
            let state = Arc::clone(&state);
            let deferred = deferred.clone();
            tokio::spawn(async move { deliver(&state, &deferred).await })
        };
        sleep(Duration::from_millis(15)).await;
        drop(guard);

        assert_eq!(delivery.await.unwrap(), Delivery::Applied);
        let handle = state.get_match(deferred.match_id).unwrap();
        assert_eq!(handle.engine().lock().await.phase(), MatchPhase::Playing);
        assert_eq!(deliver(&state, &deferred).await, Delivery::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn a_match_busy_past_every_attempt_is_left_as_it_was() {
        let (state, deferred) = ending_round(Duration::from_millis(10)).await;
        let _guard = state
            .locks()
            .try_acquire(LockKey::for_match(deferred.match_id))
            .unwrap();

        assert_eq!(deliver(&state, &deferred).await, Delivery::Exhausted);
        let handle = state.get_match(deferred.match_id).unwrap();
        assert_eq!(handle.engine().lock().await.phase(), MatchPhase::RoundEnding);
    }
}
