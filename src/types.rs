//! Common types used throughout the balancing engine

use crate::utils::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Canonical player identity: the normalized (color-stripped, trimmed,
/// lower-cased) form of a player's name, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create a canonical identity from a raw display name.
    pub fn new(raw: &str) -> Self {
        Self(normalize_name(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Game mode (ruleset) that rating records are scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "duel")]
    Duel,
    #[serde(rename = "ca")]
    ClanArena,
    #[serde(rename = "ctf")]
    CaptureTheFlag,
    #[serde(rename = "ffa")]
    FreeForAll,
    #[serde(rename = "tdm")]
    TeamDeathmatch,
    #[serde(rename = "race")]
    Race,
    #[serde(rename = "ft")]
    FreezeTag,
}

impl GameMode {
    /// Short identifier as used by the game server and the rating service.
    pub fn short_name(&self) -> &'static str {
        match self {
            GameMode::Duel => "duel",
            GameMode::ClanArena => "ca",
            GameMode::CaptureTheFlag => "ctf",
            GameMode::FreeForAll => "ffa",
            GameMode::TeamDeathmatch => "tdm",
            GameMode::Race => "race",
            GameMode::FreezeTag => "ft",
        }
    }

    /// Whether the external rating service provides data for this mode.
    pub fn is_service_supported(&self) -> bool {
        matches!(
            self,
            GameMode::Duel
                | GameMode::ClanArena
                | GameMode::CaptureTheFlag
                | GameMode::FreeForAll
                | GameMode::TeamDeathmatch
        )
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameMode::Duel => "Duel",
            GameMode::ClanArena => "Clan Arena",
            GameMode::CaptureTheFlag => "Capture the Flag",
            GameMode::FreeForAll => "Free for All",
            GameMode::TeamDeathmatch => "Team Deathmatch",
            GameMode::Race => "Race",
            GameMode::FreezeTag => "Freeze Tag",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duel" => Ok(GameMode::Duel),
            "ca" => Ok(GameMode::ClanArena),
            "ctf" => Ok(GameMode::CaptureTheFlag),
            "ffa" => Ok(GameMode::FreeForAll),
            "tdm" => Ok(GameMode::TeamDeathmatch),
            "race" => Ok(GameMode::Race),
            "ft" => Ok(GameMode::FreezeTag),
            other => Err(format!("unknown game mode: {}", other)),
        }
    }
}

/// Team a player belongs to on the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
    Spectator,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
            Team::Spectator => write!(f, "spectator"),
        }
    }
}

/// Live state of the current match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    Warmup,
    InProgress,
    Ended,
}

/// Current game-session information read from the server
#[derive(Debug, Clone, Copy)]
pub struct GameInfo {
    pub mode: GameMode,
    pub state: GameState,
}

/// Raw rating as reported by a source, before floor/ceiling clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRating {
    pub elo: i32,
    pub rank: i32,
}

/// A cached per-player, per-mode rating record.
///
/// `real_elo` holds the unclamped value whenever floor/ceiling clamping
/// altered `elo`; it is `None` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub elo: i32,
    pub rank: i32,
    pub real_elo: Option<i32>,
}

impl RatingRecord {
    /// The rating used for admission checks: the true value when clamping
    /// altered `elo`, the cached value otherwise.
    pub fn effective_elo(&self) -> i32 {
        self.real_elo.unwrap_or(self.elo)
    }
}

/// One entry of a rating batch to be merged into the cache
#[derive(Debug, Clone)]
pub struct RatingBatchEntry {
    pub name: PlayerId,
    pub modes: HashMap<GameMode, RawRating>,
    /// Set when this entry was observed under an alias of `name`'s real identity.
    pub alias_of: Option<PlayerId>,
}

impl RatingBatchEntry {
    pub fn new(name: PlayerId) -> Self {
        Self {
            name,
            modes: HashMap::new(),
            alias_of: None,
        }
    }

    pub fn with_mode(mut self, mode: GameMode, elo: i32, rank: i32) -> Self {
        self.modes.insert(mode, RawRating { elo, rank });
        self
    }
}

/// Snapshot of the current roster grouped by team
#[derive(Debug, Clone, Default)]
pub struct TeamsSnapshot {
    pub red: Vec<PlayerId>,
    pub blue: Vec<PlayerId>,
    pub spectators: Vec<PlayerId>,
}

impl TeamsSnapshot {
    /// All players currently on a team, red first.
    pub fn teamed_players(&self) -> Vec<PlayerId> {
        self.red.iter().chain(self.blue.iter()).cloned().collect()
    }

    /// Everyone connected, including spectators.
    pub fn all_players(&self) -> Vec<PlayerId> {
        self.red
            .iter()
            .chain(self.blue.iter())
            .chain(self.spectators.iter())
            .cloned()
            .collect()
    }

    pub fn total_teamed(&self) -> usize {
        self.red.len() + self.blue.len()
    }
}

/// A roster swap that would reduce the inter-team rating gap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapSuggestion {
    pub red_player: PlayerId,
    pub blue_player: PlayerId,
    /// How much the inter-team gap shrinks if the swap is applied.
    pub improvement: f64,
}

/// Result of a caller-facing operation: either it finished synchronously or
/// it was deferred until missing ratings arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_normalization() {
        assert_eq!(PlayerId::new("  Mino ").as_str(), "mino");
        assert_eq!(PlayerId::new("^1Red^7Guy").as_str(), "redguy");
        assert_eq!(PlayerId::new("EVE"), PlayerId::new("eve"));
    }

    #[test]
    fn test_game_mode_round_trip() {
        for mode in [
            GameMode::Duel,
            GameMode::ClanArena,
            GameMode::CaptureTheFlag,
            GameMode::FreeForAll,
            GameMode::TeamDeathmatch,
            GameMode::Race,
            GameMode::FreezeTag,
        ] {
            assert_eq!(mode.short_name().parse::<GameMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_service_supported_modes() {
        assert!(GameMode::Duel.is_service_supported());
        assert!(GameMode::ClanArena.is_service_supported());
        assert!(!GameMode::Race.is_service_supported());
        assert!(!GameMode::FreezeTag.is_service_supported());
    }

    #[test]
    fn test_effective_elo() {
        let clamped = RatingRecord {
            elo: 1600,
            rank: 12,
            real_elo: Some(2100),
        };
        assert_eq!(clamped.effective_elo(), 2100);

        let plain = RatingRecord {
            elo: 1450,
            rank: 80,
            real_elo: None,
        };
        assert_eq!(plain.effective_elo(), 1450);
    }
}
