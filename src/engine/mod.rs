//! Team balancing engine
//!
//! Pure average/swap-search algorithms, the two-party swap negotiation state
//! machine, and the orchestrating core that ties them to the rating cache,
//! the lookup coordinator and the pending-task queue.

pub mod balancer;
pub mod core;
pub mod suggestion;

pub use balancer::{suggest_swap, team_average};
pub use self::core::{BalanceCore, CoreStats};
pub use suggestion::{AgreeOutcome, SwapNegotiation};
