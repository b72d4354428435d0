//! Game-session interface
//!
//! The engine talks to the game server through the small surface defined
//! here: enumerating the roster, moving players between teams, muting and
//! removing players, and delivering messages. An in-memory implementation is
//! provided for tests and the console harness; the real adapter lives in the
//! surrounding application.

use crate::error::{BalanceError, Result};
use crate::types::{GameInfo, GameMode, GameState, PlayerId, Team, TeamsSnapshot};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, RwLock};

/// Output channel captured at request time; deferred operations complete
/// later through the same sink.
pub trait ReplySink: Send + Sync {
    fn reply(&self, message: &str);
}

/// Optional reply channel carried by requests and pending tasks.
pub type Reply = Option<Arc<dyn ReplySink>>;

/// Interface to the game-session API
#[async_trait]
pub trait GameServer: Send + Sync {
    /// Snapshot of the current roster grouped by team.
    async fn teams(&self) -> Result<TeamsSnapshot>;

    /// Current game mode and live/warmup state.
    async fn game_info(&self) -> Result<GameInfo>;

    /// Move a player to a team.
    async fn put(&self, player: &PlayerId, team: Team) -> Result<()>;

    /// Swap two players between their teams.
    async fn switch(&self, a: &PlayerId, b: &PlayerId) -> Result<()>;

    /// Mute a player.
    async fn mute(&self, player: &PlayerId) -> Result<()>;

    /// Kick and ban a player.
    async fn kickban(&self, player: &PlayerId) -> Result<()>;

    /// Deliver a private message to one player.
    async fn tell(&self, player: &PlayerId, message: &str) -> Result<()>;

    /// Broadcast a message to the channel everyone sees.
    async fn broadcast(&self, message: &str) -> Result<()>;
}

/// Actions recorded by the mock server, for assertions in tests
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    Put(PlayerId, Team),
    Switch(PlayerId, PlayerId),
    Mute(PlayerId),
    Kickban(PlayerId),
    Tell(PlayerId, String),
    Broadcast(String),
}

#[derive(Debug)]
struct MockServerState {
    teams: TeamsSnapshot,
    mode: GameMode,
    state: GameState,
}

/// In-memory game server for tests and the console harness
pub struct MockGameServer {
    state: RwLock<MockServerState>,
    actions: Mutex<Vec<ServerAction>>,
}

impl MockGameServer {
    pub fn new(mode: GameMode) -> Self {
        Self {
            state: RwLock::new(MockServerState {
                teams: TeamsSnapshot::default(),
                mode,
                state: GameState::Warmup,
            }),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn add_player(&self, name: &str, team: Team) {
        let player = PlayerId::new(name);
        if let Ok(mut state) = self.state.write() {
            match team {
                Team::Red => state.teams.red.push(player),
                Team::Blue => state.teams.blue.push(player),
                Team::Spectator => state.teams.spectators.push(player),
            }
        }
    }

    pub fn set_game_state(&self, game_state: GameState) {
        if let Ok(mut state) = self.state.write() {
            state.state = game_state;
        }
    }

    pub fn team_of(&self, player: &PlayerId) -> Option<Team> {
        let state = self.state.read().ok()?;
        if state.teams.red.contains(player) {
            Some(Team::Red)
        } else if state.teams.blue.contains(player) {
            Some(Team::Blue)
        } else if state.teams.spectators.contains(player) {
            Some(Team::Spectator)
        } else {
            None
        }
    }

    /// All actions performed against the server, in order.
    pub fn actions(&self) -> Vec<ServerAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Broadcast messages only, in order.
    pub fn broadcasts(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                ServerAction::Broadcast(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn record(&self, action: ServerAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }

    fn remove_everywhere(teams: &mut TeamsSnapshot, player: &PlayerId) {
        teams.red.retain(|p| p != player);
        teams.blue.retain(|p| p != player);
        teams.spectators.retain(|p| p != player);
    }
}

#[async_trait]
impl GameServer for MockGameServer {
    async fn teams(&self) -> Result<TeamsSnapshot> {
        let state = self.state.read().map_err(|_| BalanceError::InternalError {
            message: "Failed to acquire server state lock".to_string(),
        })?;
        Ok(state.teams.clone())
    }

    async fn game_info(&self) -> Result<GameInfo> {
        let state = self.state.read().map_err(|_| BalanceError::InternalError {
            message: "Failed to acquire server state lock".to_string(),
        })?;
        Ok(GameInfo {
            mode: state.mode,
            state: state.state,
        })
    }

    async fn put(&self, player: &PlayerId, team: Team) -> Result<()> {
        let mut state = self.state.write().map_err(|_| BalanceError::InternalError {
            message: "Failed to acquire server state lock".to_string(),
        })?;
        Self::remove_everywhere(&mut state.teams, player);
        match team {
            Team::Red => state.teams.red.push(player.clone()),
            Team::Blue => state.teams.blue.push(player.clone()),
            Team::Spectator => state.teams.spectators.push(player.clone()),
        }
        drop(state);
        self.record(ServerAction::Put(player.clone(), team));
        Ok(())
    }

    async fn switch(&self, a: &PlayerId, b: &PlayerId) -> Result<()> {
        let team_a = self.team_of(a).ok_or_else(|| BalanceError::PlayerNotFound {
            name: a.to_string(),
        })?;
        let team_b = self.team_of(b).ok_or_else(|| BalanceError::PlayerNotFound {
            name: b.to_string(),
        })?;
        {
            let mut state = self.state.write().map_err(|_| BalanceError::InternalError {
                message: "Failed to acquire server state lock".to_string(),
            })?;
            Self::remove_everywhere(&mut state.teams, a);
            Self::remove_everywhere(&mut state.teams, b);
            match team_b {
                Team::Red => state.teams.red.push(a.clone()),
                Team::Blue => state.teams.blue.push(a.clone()),
                Team::Spectator => state.teams.spectators.push(a.clone()),
            }
            match team_a {
                Team::Red => state.teams.red.push(b.clone()),
                Team::Blue => state.teams.blue.push(b.clone()),
                Team::Spectator => state.teams.spectators.push(b.clone()),
            }
        }
        self.record(ServerAction::Switch(a.clone(), b.clone()));
        Ok(())
    }

    async fn mute(&self, player: &PlayerId) -> Result<()> {
        self.record(ServerAction::Mute(player.clone()));
        Ok(())
    }

    async fn kickban(&self, player: &PlayerId) -> Result<()> {
        self.record(ServerAction::Kickban(player.clone()));
        Ok(())
    }

    async fn tell(&self, player: &PlayerId, message: &str) -> Result<()> {
        self.record(ServerAction::Tell(player.clone(), message.to_string()));
        Ok(())
    }

    async fn broadcast(&self, message: &str) -> Result<()> {
        self.record(ServerAction::Broadcast(message.to_string()));
        Ok(())
    }
}

/// Reply sink that records messages, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.replies().is_empty()
    }
}

impl ReplySink for RecordingSink {
    fn reply(&self, message: &str) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push(message.to_string());
        }
    }
}
