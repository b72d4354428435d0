//! Rating admission policy
//!
//! Decides what happens to players whose effective rating (the unclamped
//! value when clamping applied, the cached value otherwise) falls outside
//! the configured bounds. Policy evaluation is pure; enforcement (moving,
//! muting, delayed removal) is carried out by the engine core.

use crate::config::GateSettings;
use crate::rating::RatingStore;
use crate::types::{GameMode, PlayerId};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::warn;

/// Enforcement decision for one non-compliant player
#[derive(Debug, Clone, PartialEq)]
pub enum GateAction {
    /// Move the player to spectator with an explanatory message.
    MoveToSpectator { name: PlayerId, message: String },
    /// Flag, mute and remove the player after the grace delay.
    DelayedRemoval { name: PlayerId },
}

impl GateAction {
    pub fn player(&self) -> &PlayerId {
        match self {
            GateAction::MoveToSpectator { name, .. } => name,
            GateAction::DelayedRemoval { name } => name,
        }
    }
}

/// Evaluate the admission policy for a set of players.
///
/// Every name is expected to be cached for `mode`; uncached names are
/// skipped with a diagnostic rather than failing the whole check.
pub fn evaluate(
    names: &[PlayerId],
    store: &RatingStore,
    mode: GameMode,
    settings: &GateSettings,
) -> Vec<GateAction> {
    if !settings.is_enabled() {
        return Vec::new();
    }

    let mut actions = Vec::new();
    for name in names {
        let Some(record) = store.get(name, mode) else {
            warn!(player = %name, ?mode, "admission check on uncached player, skipping");
            continue;
        };
        let rating = record.effective_elo();

        let above = settings.maximum_rating != 0 && rating > settings.maximum_rating;
        let below = settings.minimum_rating != 0 && rating < settings.minimum_rating;
        if !above && !below {
            continue;
        }

        if settings.allow_spectators {
            let message = if above {
                format!(
                    "Sorry, but you can have at most {} rating to play here and you have {}.",
                    settings.maximum_rating, rating
                )
            } else {
                format!(
                    "Sorry, but you need at least {} rating to play here and you have {}.",
                    settings.minimum_rating, rating
                )
            };
            actions.push(GateAction::MoveToSpectator {
                name: name.clone(),
                message,
            });
        } else {
            actions.push(GateAction::DelayedRemoval { name: name.clone() });
        }
    }
    actions
}

/// Players flagged for delayed removal.
///
/// Flagged players are kept out of teams until the kickban fires; the list
/// has its own lock since it is touched from enforcement timers.
#[derive(Debug, Default)]
pub struct FlagList {
    flagged: Mutex<HashSet<PlayerId>>,
}

impl FlagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, player: &PlayerId) {
        if let Ok(mut flagged) = self.flagged.lock() {
            flagged.insert(player.clone());
        }
    }

    pub fn unflag(&self, player: &PlayerId) {
        if let Ok(mut flagged) = self.flagged.lock() {
            flagged.remove(player);
        }
    }

    pub fn is_flagged(&self, player: &PlayerId) -> bool {
        self.flagged
            .lock()
            .map(|flagged| flagged.contains(player))
            .unwrap_or(false)
    }
}
