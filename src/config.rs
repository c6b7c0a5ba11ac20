//! Application-level configuration loading, plus the per-match engine configuration record.

use std::{collections::HashSet, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use crate::engine::{
    end_round::{DEFAULT_END_DELAY, EndRoundMode},
    phase::PhaseSpec,
    scoring::CalculatorKind,
    turn::TurnMode,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MATCH_ENGINE_CONFIG_PATH";
/// Environment variable that overrides the listening port.
const PORT_ENV: &str = "PORT";

/// Port used when neither the config file nor `PORT` provide one.
pub const DEFAULT_PORT: u16 = 8080;
/// Lifetime of a scoped match lock before another holder may take it over.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);
/// Delivery attempts for one deferred signal.
pub const DEFAULT_SIGNAL_MAX_ATTEMPTS: u32 = 5;
/// First pause between two delivery attempts; doubled after each failure.
pub const DEFAULT_SIGNAL_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Period of the persistence reconciliation pass.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
/// Buffered notifications per match before slow subscribers lag.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Pause between the end of a round and the start of the next one.
pub const DEFAULT_ROUND_END_DELAY: Duration = DEFAULT_END_DELAY;
/// Upper bound accepted for `total_rounds`.
pub const MAX_ROUNDS: u32 = 10_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// HTTP listening port.
    pub port: u16,
    /// TTL of scoped locks.
    pub lock_ttl: Duration,
    /// Delivery attempts per deferred signal.
    pub signal_max_attempts: u32,
    /// Initial retry delay for deferred signals.
    pub signal_retry_delay: Duration,
    /// Reconciliation period.
    pub reconcile_interval: Duration,
    /// Per-match broadcast capacity.
    pub event_capacity: usize,
    /// Engine configuration used when a match is created without one.
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        port = app_config.port,
                        "loaded application config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_port_override()
    }

    fn with_port_override(mut self) -> Self {
        if let Some(port) = env::var(PORT_ENV).ok().and_then(|raw| raw.parse().ok()) {
            self.port = port;
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            lock_ttl: DEFAULT_LOCK_TTL,
            signal_max_attempts: DEFAULT_SIGNAL_MAX_ATTEMPTS,
            signal_retry_delay: DEFAULT_SIGNAL_RETRY_DELAY,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            engine: EngineConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    port: Option<u16>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    lock_ttl_ms: Option<Duration>,
    signal_max_attempts: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    signal_retry_delay_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default)]
    reconcile_interval_ms: Option<Duration>,
    event_capacity: Option<usize>,
    engine: Option<EngineConfig>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let engine = match value.engine {
            Some(engine) => match engine.validate() {
                Ok(()) => engine,
                Err(err) => {
                    warn!(error = %err, "invalid engine config; using engine defaults");
                    defaults.engine
                }
            },
            None => defaults.engine,
        };

        Self {
            port: value.port.unwrap_or(defaults.port),
            lock_ttl: value.lock_ttl_ms.unwrap_or(defaults.lock_ttl),
            signal_max_attempts: value
                .signal_max_attempts
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.signal_max_attempts),
            signal_retry_delay: value
                .signal_retry_delay_ms
                .unwrap_or(defaults.signal_retry_delay),
            reconcile_interval: value
                .reconcile_interval_ms
                .filter(|interval| !interval.is_zero())
                .unwrap_or(defaults.reconcile_interval),
            event_capacity: value
                .event_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.event_capacity),
            engine,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Roles available in a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Role names players may hold.
    pub available_roles: Vec<String>,
    /// Whether a player may hold several roles at once.
    #[serde(default)]
    pub allow_multiple_roles: bool,
}

/// Static configuration of one match, recorded at initialize.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_engine_config"))]
#[serde(default)]
pub struct EngineConfig {
    /// Number of rounds; 0 means unbounded.
    #[validate(range(max = MAX_ROUNDS))]
    pub total_rounds: u32,
    /// How turns rotate.
    pub turn_mode: TurnMode,
    /// End-of-round strategy; derived from `turn_mode` when unset.
    pub end_round_mode: Option<EndRoundMode>,
    /// Pause between rounds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "round_end_delay_ms")]
    pub round_end_delay: Duration,
    /// Calculator used to turn scoring events into points.
    pub scoring: CalculatorKind,
    /// Keep a per-event score history.
    pub track_score_history: bool,
    /// Shuffle the roster into a random turn order at initialize.
    pub shuffle_turn_order: bool,
    /// Roles, when the game uses them.
    pub roles: Option<RoleConfig>,
    /// Phase plan; the first entry starts with every round.
    #[validate(nested)]
    pub phases: Vec<PhaseSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_rounds: 0,
            turn_mode: TurnMode::Sequential,
            end_round_mode: None,
            round_end_delay: DEFAULT_ROUND_END_DELAY,
            scoring: CalculatorKind::PassThrough,
            track_score_history: false,
            shuffle_turn_order: false,
            roles: None,
            phases: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Strategy mode in effect.
    pub fn effective_end_round_mode(&self) -> EndRoundMode {
        self.end_round_mode
            .unwrap_or_else(|| EndRoundMode::for_turn_mode(self.turn_mode))
    }
}

fn validate_engine_config(config: &EngineConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    if let Some(duplicate) = config
        .phases
        .iter()
        .find(|phase| !seen.insert(phase.name.as_str()))
    {
        let mut err = ValidationError::new("phase_names_unique");
        err.message = Some(format!("phase `{}` is configured twice", duplicate.name).into());
        return Err(err);
    }

    let bad_roles = config.roles.as_ref().is_some_and(|roles| {
        roles.available_roles.is_empty() || roles.available_roles.iter().any(String::is_empty)
    });
    if bad_roles {
        let mut err = ValidationError::new("roles_non_empty");
        err.message = Some("role list must contain non-empty names".into());
        return Err(err);
    }

    if config.effective_end_round_mode() == EndRoundMode::PhaseBased && config.phases.is_empty() {
        let mut err = ValidationError::new("phase_based_requires_phases");
        err.message = Some("phase-based rounds need at least one phase".into());
        return Err(err);
    }

    Ok(())
}
