//! Configuration structures for the balancing engine

pub mod app;

pub use app::{
    validate_config, AppConfig, BalanceSettings, GateSettings, RatingServiceSettings,
    ServiceSettings,
};
