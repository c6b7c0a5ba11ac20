use serde::Serialize;

/// Simple health response returned by the `/health` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Matches held in memory.
    pub live_matches: usize,
    /// Matches whose stored state could not be read.
    pub halted_matches: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(live_matches: usize, halted_matches: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_matches,
            halted_matches,
        }
    }

    /// Create a health response indicating the store cannot be reached.
    pub fn degraded(live_matches: usize, halted_matches: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_matches,
            halted_matches,
        }
    }
}
