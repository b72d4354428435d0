//! External rating service client interface and lookup bookkeeping
//!
//! Batch fetches against the slow external rating service run on their own
//! worker tasks. This module defines the wire format and client trait, plus
//! the table tracking in-flight lookups so no player is ever fetched twice
//! concurrently.

pub mod coordinator;
pub mod service;

pub use coordinator::{LookupTable, OutstandingLookup};
pub use service::{FetchError, MockRatingService, RatingService, ServiceResponse};
