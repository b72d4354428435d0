//! Error types for the balancing engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the crate.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific balancing scenarios
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("Teams cannot be balanced with an odd number of players: {total}")]
    UnevenTeams { total: usize },

    #[error("Invalid player name: {name}")]
    InvalidPlayerName { name: String },

    #[error("Player not found: {name}")]
    PlayerNotFound { name: String },

    #[error("Local rating store error: {message}")]
    LocalStoreFailed { message: String },

    #[error("Game server error: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal engine error: {message}")]
    InternalError { message: String },
}
