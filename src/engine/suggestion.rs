//! Swap negotiation state machine
//!
//! After a teams-info computation surfaces an improving swap, both named
//! players must agree before it is applied. Agreement within a short window
//! after a round countdown applies immediately during a live match;
//! otherwise the swap waits for the next countdown. A match ending always
//! clears the state so no stale swap carries into a rematch.

use crate::types::PlayerId;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of recording one player's agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreeOutcome {
    /// No suggestion is active or the player is not part of it.
    NotParty,
    /// The agreement was recorded; the other player has not agreed yet.
    Recorded,
    /// Both players have now agreed.
    BothAgreed,
}

/// Negotiation state for the currently suggested swap
#[derive(Debug, Default)]
pub struct SwapNegotiation {
    pair: Option<(PlayerId, PlayerId)>,
    agreed: (bool, bool),
    last_countdown: Option<DateTime<Utc>>,
}

impl SwapNegotiation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a suggestion. A pair identical to the current one keeps its
    /// recorded agreements; a different pair resets them.
    pub fn propose(&mut self, red_player: PlayerId, blue_player: PlayerId) {
        let pair = (red_player, blue_player);
        if self.pair.as_ref() != Some(&pair) {
            self.pair = Some(pair);
            self.agreed = (false, false);
        }
    }

    /// Clear the suggestion and any recorded agreements.
    pub fn reset(&mut self) {
        self.pair = None;
        self.agreed = (false, false);
    }

    pub fn suggested_pair(&self) -> Option<&(PlayerId, PlayerId)> {
        self.pair.as_ref()
    }

    pub fn both_agreed(&self) -> bool {
        self.pair.is_some() && self.agreed.0 && self.agreed.1
    }

    /// Record one player's agreement to the active suggestion.
    pub fn agree(&mut self, player: &PlayerId) -> AgreeOutcome {
        let Some((a, b)) = &self.pair else {
            return AgreeOutcome::NotParty;
        };
        if player == a {
            self.agreed.0 = true;
        } else if player == b {
            self.agreed.1 = true;
        } else {
            return AgreeOutcome::NotParty;
        }
        if self.agreed.0 && self.agreed.1 {
            AgreeOutcome::BothAgreed
        } else {
            AgreeOutcome::Recorded
        }
    }

    /// Take the agreed pair for execution, clearing the state.
    pub fn take_pair(&mut self) -> Option<(PlayerId, PlayerId)> {
        let pair = self.pair.take();
        self.agreed = (false, false);
        pair
    }

    /// Note that a round countdown just happened.
    pub fn note_countdown(&mut self, now: DateTime<Utc>) {
        self.last_countdown = Some(now);
    }

    /// Whether `now` falls within the post-countdown window during which an
    /// agreed swap may be applied immediately in a live match.
    pub fn within_agree_window(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_countdown {
            Some(countdown) => {
                let elapsed = now.signed_duration_since(countdown);
                elapsed >= chrono::Duration::zero()
                    && elapsed <= chrono::Duration::from_std(window).unwrap_or_default()
            }
            None => false,
        }
    }
}
