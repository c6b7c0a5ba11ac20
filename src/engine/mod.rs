//! Game-agnostic match orchestration: turns, rounds, scoring, roles, phases and lifecycle.

/// Per-round submissions and locks.
pub mod actions;
/// Side effects queued by engine calls.
pub mod effects;
/// End-of-round decision strategies.
pub mod end_round;
/// The orchestrator.
pub mod game;
/// Per-game callbacks.
pub mod hooks;
/// Match lifecycle state machine.
pub mod lifecycle;
/// Outbound notifications.
pub mod notifications;
/// Timed phases.
pub mod phase;
/// Role assignment.
pub mod roles;
/// Round counting and eliminations.
pub mod round;
/// Scores and calculators.
pub mod scoring;
/// Turn rotation.
pub mod turn;

/// Participant identifier.
pub type PlayerId = u64;
