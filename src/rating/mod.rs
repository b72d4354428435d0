//! Rating cache and local rating store
//!
//! This module holds the in-memory rating cache shared across the engine and
//! the interface to locally (manually) assigned ratings and player aliases.

pub mod cache;
pub mod local;

pub use cache::{ClampSettings, RatingStore};
pub use local::{InMemoryLocalStore, LocalStore, ManualRatingUpdate};
