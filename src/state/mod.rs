//! Shared application state: live matches, halted matches, locks and degraded mode.

/// Per-match broadcast hub.
pub mod hub;
/// Key-scoped TTL locks.
pub mod locks;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::match_store::MatchStore, engine::game::GameEngine,
    games::GameRegistry,
};

pub use self::hub::EventHub;
pub use self::locks::{LockGuard, LockKey, LockRegistry};

/// Handle to the application state shared by every request and task.
pub type SharedState = Arc<AppState>;
/// Longest a single store call may take before it counts as a failure.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// One live match: its engine behind a mutex plus the hub its notifications go to.
pub struct MatchHandle {
    match_id: Uuid,
    engine: Mutex<GameEngine>,
    events: EventHub,
}

impl MatchHandle {
    /// Wrap `engine` with a hub buffering `event_capacity` notifications.
    pub fn new(engine: GameEngine, event_capacity: usize) -> Self {
        Self {
            match_id: engine.match_id(),
            engine: Mutex::new(engine),
            events: EventHub::new(event_capacity),
        }
    }

    /// Id of the wrapped match.
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Serializes every read-modify-persist cycle of the match.
    pub fn engine(&self) -> &Mutex<GameEngine> {
        &self.engine
    }

    /// Broadcast hub of the match's notifications.
    pub fn events(&self) -> &EventHub {
        &self.events
    }
}

/// Central application state: match registry, store handle and shared locks.
pub struct AppState {
    config: AppConfig,
    games: GameRegistry,
    store: Arc<dyn MatchStore>,
    matches: DashMap<Uuid, Arc<MatchHandle>>,
    halted: DashMap<Uuid, String>,
    locks: LockRegistry,
    degraded: watch::Sender<bool>,
    store_timeout: Duration,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, games: GameRegistry, store: Arc<dyn MatchStore>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        let locks = LockRegistry::new(config.lock_ttl);
        Arc::new(Self {
            config,
            games,
            store,
            matches: DashMap::new(),
            halted: DashMap::new(),
            locks,
            degraded: degraded_tx,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Games matches can be created for.
    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    /// Handle to the match store.
    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    /// Bound applied to every store call.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Scoped TTL locks.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Register a live match, replacing any previous handle under the same id.
    pub fn insert_match(&self, handle: MatchHandle) -> Arc<MatchHandle> {
        let match_id = handle.match_id;
        let handle = Arc::new(handle);
        self.matches.insert(match_id, Arc::clone(&handle));
        handle
    }

    /// Forget a live match.
    pub fn remove_match(&self, match_id: Uuid) -> Option<Arc<MatchHandle>> {
        self.matches.remove(&match_id).map(|(_, handle)| handle)
    }

    /// Live match registered under `match_id`.
    pub fn get_match(&self, match_id: Uuid) -> Option<Arc<MatchHandle>> {
        self.matches
            .get(&match_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every live match.
    pub fn match_ids(&self) -> Vec<Uuid> {
        self.matches.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of live matches.
    pub fn live_count(&self) -> usize {
        self.matches.len()
    }

    /// Stop progressing a match whose state cannot be trusted.
    pub fn halt(&self, match_id: Uuid, reason: String) {
        self.matches.remove(&match_id);
        self.halted.insert(match_id, reason);
    }

    /// Why the match was halted, if it was.
    pub fn halted_reason(&self, match_id: Uuid) -> Option<String> {
        self.halted.get(&match_id).map(|entry| entry.value().clone())
    }

    /// Number of halted matches.
    pub fn halted_count(&self) -> usize {
        self.halted.len()
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
