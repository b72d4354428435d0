//! Local rating store interface
//!
//! Manually-assigned ratings and registered player aliases live in a database
//! owned by the surrounding application. The engine only needs the small
//! read/write surface defined here; an in-memory implementation is provided
//! for tests and the console harness.

use crate::error::Result;
use crate::types::{GameMode, PlayerId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[cfg(test)]
use mockall::automock;

/// Outcome of a manual rating upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualRatingUpdate {
    /// The player was unknown and has been added along with the rating.
    NewPlayer,
    /// The player already had a rating for this mode; it was replaced.
    Updated,
    /// The player was known but had no rating for this mode.
    Created,
}

/// Trait for the local (manually-assigned) rating and alias store
#[cfg_attr(test, automock)]
pub trait LocalStore: Send + Sync {
    /// All manually-assigned ratings for a player, across modes.
    fn manual_ratings(&self, name: &PlayerId) -> Result<Vec<(GameMode, i32)>>;

    /// Upsert a manual rating for one (player, mode) pair.
    fn set_manual_rating(
        &self,
        name: &PlayerId,
        mode: GameMode,
        elo: i32,
    ) -> Result<ManualRatingUpdate>;

    /// Remove a manual rating; returns whether anything was deleted.
    fn remove_manual_rating(&self, name: &PlayerId, mode: GameMode) -> Result<bool>;

    /// Resolve an alias name to its canonical identity, if registered.
    fn resolve_alias(&self, name: &PlayerId) -> Result<Option<PlayerId>>;
}

/// In-memory local store for tests and the console harness
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    players: RwLock<HashSet<PlayerId>>,
    ratings: RwLock<HashMap<PlayerId, HashMap<GameMode, i32>>>,
    aliases: RwLock<HashMap<PlayerId, PlayerId>>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias name pointing at a canonical identity.
    pub fn register_alias(&self, alias: PlayerId, real: PlayerId) {
        if let Ok(mut aliases) = self.aliases.write() {
            aliases.insert(alias, real);
        }
    }
}

impl LocalStore for InMemoryLocalStore {
    fn manual_ratings(&self, name: &PlayerId) -> Result<Vec<(GameMode, i32)>> {
        let ratings = self
            .ratings
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire ratings read lock"))?;
        Ok(ratings
            .get(name)
            .map(|modes| modes.iter().map(|(m, e)| (*m, *e)).collect())
            .unwrap_or_default())
    }

    fn set_manual_rating(
        &self,
        name: &PlayerId,
        mode: GameMode,
        elo: i32,
    ) -> Result<ManualRatingUpdate> {
        let mut players = self
            .players
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire players write lock"))?;
        let mut ratings = self
            .ratings
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire ratings write lock"))?;

        let new_player = players.insert(name.clone());
        let previous = ratings.entry(name.clone()).or_default().insert(mode, elo);

        if new_player {
            Ok(ManualRatingUpdate::NewPlayer)
        } else if previous.is_some() {
            Ok(ManualRatingUpdate::Updated)
        } else {
            Ok(ManualRatingUpdate::Created)
        }
    }

    fn remove_manual_rating(&self, name: &PlayerId, mode: GameMode) -> Result<bool> {
        let mut ratings = self
            .ratings
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire ratings write lock"))?;
        Ok(ratings
            .get_mut(name)
            .map(|modes| modes.remove(&mode).is_some())
            .unwrap_or(false))
    }

    fn resolve_alias(&self, name: &PlayerId) -> Result<Option<PlayerId>> {
        let aliases = self
            .aliases
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire aliases read lock"))?;
        Ok(aliases.get(name).cloned())
    }
}
