//! Team Balancer - Rating cache and team-balancing engine
//!
//! This crate caches player ratings fetched from an external rating service,
//! evens out and balances team rosters by average rating, negotiates swap
//! suggestions between players and enforces a rating admission policy.

pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod lookup;
pub mod metrics;
pub mod pending;
pub mod rating;
pub mod server;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{BalanceError, Result};
pub use types::*;

// Re-export key components
pub use engine::{BalanceCore, CoreStats};
pub use lookup::RatingService;
pub use rating::LocalStore;
pub use server::{GameServer, Reply, ReplySink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
