//! Rating service client trait and wire format
//!
//! The external service takes one batch request covering a set of canonical
//! names and returns per-name results keyed by the game modes it supports,
//! plus an explicit `alias_of` tag when it resolved a name internally.

use crate::types::{GameMode, PlayerId, RatingBatchEntry, RawRating};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, RwLock};

/// How a batch fetch failed, distinguishing timeouts from service-level
/// errors so the coordinator can produce a specific message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("rating service connection timed out")]
    Timeout,

    #[error("rating service failed with error code {0}")]
    Status(u16),

    #[error("rating service returned a malformed response: {0}")]
    Malformed(String),
}

/// Per-mode rating as reported on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceRating {
    pub elo: i32,
    pub rank: i32,
}

/// One player's result in a batch response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePlayer {
    pub nick: String,
    /// Present when the service resolved this name through its own alias database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    /// Remaining keys are game-mode short names.
    #[serde(flatten)]
    pub modes: HashMap<String, ServiceRating>,
}

/// Batch response from the rating service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub players: Vec<ServicePlayer>,
}

impl ServiceResponse {
    /// Parse a raw response body, mapping JSON errors to `Malformed`.
    pub fn parse(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// Convert the wire response into a cache batch, re-attributing results
    /// to the originally requested names via `aliases` (canonical name to
    /// requested alias). Unknown mode keys are skipped.
    pub fn into_batch(self, aliases: &HashMap<PlayerId, PlayerId>) -> Vec<RatingBatchEntry> {
        self.players
            .into_iter()
            .map(|player| {
                let canonical = PlayerId::new(&player.nick);
                let mut entry = match aliases.get(&canonical) {
                    Some(requested) => {
                        let mut e = RatingBatchEntry::new(requested.clone());
                        e.alias_of = Some(canonical);
                        e
                    }
                    None => {
                        let mut e = RatingBatchEntry::new(canonical);
                        e.alias_of = player
                            .alias_of
                            .as_deref()
                            .map(PlayerId::new);
                        e
                    }
                };
                for (key, rating) in player.modes {
                    if let Ok(mode) = GameMode::from_str(&key) {
                        entry.modes.insert(
                            mode,
                            RawRating {
                                elo: rating.elo,
                                rank: rating.rank,
                            },
                        );
                    }
                }
                entry
            })
            .collect()
    }
}

/// Client for the external rating lookup service
#[async_trait]
pub trait RatingService: Send + Sync {
    /// Fetch ratings for a batch of canonical names. Blocking-network
    /// concerns (timeouts included) are owned by the implementation.
    async fn fetch_batch(&self, names: &[PlayerId]) -> Result<ServiceResponse, FetchError>;
}

/// Mock rating service for tests and the console harness
///
/// Scripted responses are served first, in order; when the script is
/// exhausted, responses are synthesized from the default ratings table.
#[derive(Debug, Default)]
pub struct MockRatingService {
    scripted: Mutex<VecDeque<Result<ServiceResponse, FetchError>>>,
    defaults: RwLock<HashMap<PlayerId, ServiceRating>>,
    requests: Mutex<Vec<Vec<PlayerId>>>,
}

impl MockRatingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted response (or failure) for the next fetch.
    pub fn push_response(&self, response: Result<ServiceResponse, FetchError>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push_back(response);
        }
    }

    /// Set the rating synthesized for a player once the script runs out.
    pub fn set_default_rating(&self, name: &str, elo: i32, rank: i32) {
        if let Ok(mut defaults) = self.defaults.write() {
            defaults.insert(PlayerId::new(name), ServiceRating { elo, rank });
        }
    }

    /// Every batch of names requested so far, in order.
    pub fn requests(&self) -> Vec<Vec<PlayerId>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    fn synthesize(&self, names: &[PlayerId]) -> ServiceResponse {
        let defaults = self.defaults.read().ok();
        let players = names
            .iter()
            .map(|name| {
                let rating = defaults
                    .as_ref()
                    .and_then(|d| d.get(name).copied())
                    .unwrap_or(ServiceRating {
                        elo: 1500,
                        rank: 1000,
                    });
                let mut modes = HashMap::new();
                for mode in ["duel", "ca", "ctf", "ffa", "tdm"] {
                    modes.insert(mode.to_string(), rating);
                }
                ServicePlayer {
                    nick: name.to_string(),
                    alias_of: None,
                    modes,
                }
            })
            .collect();
        ServiceResponse { players }
    }
}

#[async_trait]
impl RatingService for MockRatingService {
    async fn fetch_batch(&self, names: &[PlayerId]) -> Result<ServiceResponse, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(names.to_vec());
        }
        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front());
        match scripted {
            Some(response) => response,
            None => Ok(self.synthesize(names)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = br#"{"players":[{"nick":"eve","ca":{"elo":1600,"rank":40},"duel":{"elo":1550,"rank":70}}]}"#;
        let response = ServiceResponse::parse(body).unwrap();
        assert_eq!(response.players.len(), 1);
        let player = &response.players[0];
        assert_eq!(player.nick, "eve");
        assert_eq!(player.modes["ca"].elo, 1600);
        assert_eq!(player.modes["duel"].rank, 70);
        assert!(player.alias_of.is_none());
    }

    #[test]
    fn test_parse_malformed_response() {
        let err = ServiceResponse::parse(b"not json").unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_into_batch_skips_unknown_modes() {
        let body = br#"{"players":[{"nick":"eve","ca":{"elo":1600,"rank":40},"bogus":{"elo":1,"rank":1}}]}"#;
        let response = ServiceResponse::parse(body).unwrap();
        let batch = response.into_batch(&HashMap::new());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].modes.len(), 1);
        assert!(batch[0].modes.contains_key(&GameMode::ClanArena));
    }

    #[test]
    fn test_into_batch_reattributes_aliases() {
        let body = br#"{"players":[{"nick":"eve","ca":{"elo":1600,"rank":40}}]}"#;
        let response = ServiceResponse::parse(body).unwrap();

        let mut aliases = HashMap::new();
        aliases.insert(PlayerId::new("eve"), PlayerId::new("smurf"));
        let batch = response.into_batch(&aliases);

        assert_eq!(batch[0].name, PlayerId::new("smurf"));
        assert_eq!(batch[0].alias_of, Some(PlayerId::new("eve")));
    }

    #[test]
    fn test_into_batch_keeps_service_alias_tag() {
        let body = br#"{"players":[{"nick":"smurf","alias_of":"eve","ca":{"elo":1600,"rank":40}}]}"#;
        let response = ServiceResponse::parse(body).unwrap();
        let batch = response.into_batch(&HashMap::new());
        assert_eq!(batch[0].name, PlayerId::new("smurf"));
        assert_eq!(batch[0].alias_of, Some(PlayerId::new("eve")));
    }

    #[tokio::test]
    async fn test_mock_service_scripted_then_synthesized() {
        let service = MockRatingService::new();
        service.push_response(Err(FetchError::Timeout));
        service.set_default_rating("a", 1200, 500);

        let names = vec![PlayerId::new("a")];
        assert!(matches!(
            service.fetch_batch(&names).await,
            Err(FetchError::Timeout)
        ));
        let response = service.fetch_batch(&names).await.unwrap();
        assert_eq!(response.players[0].modes["ca"].elo, 1200);
        assert_eq!(service.request_count(), 2);
    }
}
