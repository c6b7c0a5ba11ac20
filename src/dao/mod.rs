/// Match document persistence.
pub mod match_store;
/// Versioned persisted form of a match.
pub mod schema;
/// Storage abstraction layer errors.
pub mod storage;
