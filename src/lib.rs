//! Library crate for match-engine, exposing the engine, games and server layers
//! to the binary and to tests.

/// Server and per-match configuration.
pub mod config;
/// Match persistence.
pub mod dao;
/// Request, response and SSE payloads.
pub mod dto;
/// Synchronous match engine.
pub mod engine;
/// Engine, service and HTTP errors.
pub mod error;
/// Built-in games.
pub mod games;
/// HTTP routes.
pub mod routes;
/// Async services driving the engine.
pub mod services;
/// Shared application state.
pub mod state;
