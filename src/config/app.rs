//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! team-balancer engine, including environment variable loading, TOML file
//! loading and validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub balance: BalanceSettings,
    pub gate: GateSettings,
    pub rating_service: RatingServiceSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Balancing behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceSettings {
    /// Ratings below this value are clamped up to it (0 = disabled)
    pub floor_rating: i32,
    /// Ratings above this value are clamped down to it (0 = disabled)
    pub ceiling_rating: i32,
    /// Consult manually-assigned local ratings before the external service
    pub use_local_ratings: bool,
    /// Resolve registered aliases before querying the external service
    pub use_aliases: bool,
    /// Minimum gap improvement before a swap suggestion is surfaced
    pub minimum_suggestion_diff: i32,
    /// Seconds after a round countdown during which an agreed swap applies immediately
    pub agree_window_seconds: u64,
}

/// Rating admission policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Minimum effective rating required to play (0 = disabled)
    pub minimum_rating: i32,
    /// Maximum effective rating allowed to play (0 = disabled)
    pub maximum_rating: i32,
    /// Move non-compliant players to spectator instead of removing them
    pub allow_spectators: bool,
    /// Seconds before a flagged player is warned about removal
    pub kick_warning_delay_seconds: u64,
    /// Seconds before a flagged player is kickbanned
    pub kick_delay_seconds: u64,
}

/// External rating service client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingServiceSettings {
    /// Connection-level timeout for one batch fetch, in seconds
    pub timeout_seconds: u64,
    /// Consecutive failures tolerated before the circuit breaker trips
    pub fails_allowed: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "team-balancer".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self {
            floor_rating: 0,
            ceiling_rating: 0,
            use_local_ratings: true,
            use_aliases: true,
            minimum_suggestion_diff: 25,
            agree_window_seconds: 7,
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            minimum_rating: 0,
            maximum_rating: 0,
            allow_spectators: true,
            kick_warning_delay_seconds: 25,
            kick_delay_seconds: 40,
        }
    }
}

impl Default for RatingServiceSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            fails_allowed: 2,
        }
    }
}

impl GateSettings {
    /// Whether an admission policy is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.minimum_rating != 0 || self.maximum_rating != 0
    }

    pub fn kick_warning_delay(&self) -> Duration {
        Duration::from_secs(self.kick_warning_delay_seconds)
    }

    pub fn kick_delay(&self) -> Duration {
        Duration::from_secs(self.kick_delay_seconds)
    }
}

impl BalanceSettings {
    pub fn agree_window(&self) -> Duration {
        Duration::from_secs(self.agree_window_seconds)
    }
}

impl RatingServiceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }

        if let Ok(floor) = env::var("FLOOR_RATING") {
            config.balance.floor_rating = floor
                .parse()
                .map_err(|_| anyhow!("Invalid FLOOR_RATING value: {}", floor))?;
        }
        if let Ok(ceiling) = env::var("CEILING_RATING") {
            config.balance.ceiling_rating = ceiling
                .parse()
                .map_err(|_| anyhow!("Invalid CEILING_RATING value: {}", ceiling))?;
        }
        if let Ok(use_local) = env::var("USE_LOCAL_RATINGS") {
            config.balance.use_local_ratings = use_local
                .parse()
                .map_err(|_| anyhow!("Invalid USE_LOCAL_RATINGS value: {}", use_local))?;
        }
        if let Ok(use_aliases) = env::var("USE_ALIASES") {
            config.balance.use_aliases = use_aliases
                .parse()
                .map_err(|_| anyhow!("Invalid USE_ALIASES value: {}", use_aliases))?;
        }
        if let Ok(diff) = env::var("MINIMUM_SUGGESTION_DIFF") {
            config.balance.minimum_suggestion_diff = diff
                .parse()
                .map_err(|_| anyhow!("Invalid MINIMUM_SUGGESTION_DIFF value: {}", diff))?;
        }
        if let Ok(window) = env::var("AGREE_WINDOW_SECONDS") {
            config.balance.agree_window_seconds = window
                .parse()
                .map_err(|_| anyhow!("Invalid AGREE_WINDOW_SECONDS value: {}", window))?;
        }

        if let Ok(min) = env::var("MINIMUM_RATING") {
            config.gate.minimum_rating = min
                .parse()
                .map_err(|_| anyhow!("Invalid MINIMUM_RATING value: {}", min))?;
        }
        if let Ok(max) = env::var("MAXIMUM_RATING") {
            config.gate.maximum_rating = max
                .parse()
                .map_err(|_| anyhow!("Invalid MAXIMUM_RATING value: {}", max))?;
        }
        if let Ok(allow) = env::var("ALLOW_SPECTATORS") {
            config.gate.allow_spectators = allow
                .parse()
                .map_err(|_| anyhow!("Invalid ALLOW_SPECTATORS value: {}", allow))?;
        }

        if let Ok(timeout) = env::var("RATING_SERVICE_TIMEOUT_SECONDS") {
            config.rating_service.timeout_seconds = timeout.parse().map_err(|_| {
                anyhow!("Invalid RATING_SERVICE_TIMEOUT_SECONDS value: {}", timeout)
            })?;
        }
        if let Ok(fails) = env::var("RATING_SERVICE_FAILS_ALLOWED") {
            config.rating_service.fails_allowed = fails
                .parse()
                .map_err(|_| anyhow!("Invalid RATING_SERVICE_FAILS_ALLOWED value: {}", fails))?;
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    let balance = &config.balance;
    if balance.floor_rating < 0 || balance.ceiling_rating < 0 {
        return Err(anyhow!("Rating clamp bounds cannot be negative"));
    }
    if balance.floor_rating != 0
        && balance.ceiling_rating != 0
        && balance.floor_rating > balance.ceiling_rating
    {
        return Err(anyhow!(
            "Floor rating {} exceeds ceiling rating {}",
            balance.floor_rating,
            balance.ceiling_rating
        ));
    }
    if balance.minimum_suggestion_diff < 0 {
        return Err(anyhow!("Minimum suggestion difference cannot be negative"));
    }

    let gate = &config.gate;
    if gate.minimum_rating < 0 || gate.maximum_rating < 0 {
        return Err(anyhow!("Admission rating bounds cannot be negative"));
    }
    if gate.minimum_rating != 0
        && gate.maximum_rating != 0
        && gate.minimum_rating > gate.maximum_rating
    {
        return Err(anyhow!(
            "Minimum rating {} exceeds maximum rating {}",
            gate.minimum_rating,
            gate.maximum_rating
        ));
    }

    if config.rating_service.timeout_seconds == 0 {
        return Err(anyhow!("Rating service timeout must be greater than 0"));
    }

    Ok(())
}
