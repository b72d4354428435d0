//! Integration tests for the team-balancing engine
//!
//! These tests drive `BalanceCore` end to end against the in-memory game
//! server and the mock rating service, exercising the deferred-operation
//! flow: operations that need uncached ratings park themselves, a batch
//! fetch completes in the background and the parked work replays through
//! the original reply channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use team_balancer::config::AppConfig;
use team_balancer::engine::BalanceCore;
use team_balancer::lookup::{FetchError, MockRatingService, RatingService, ServiceResponse};
use team_balancer::rating::InMemoryLocalStore;
use team_balancer::server::{GameServer, MockGameServer, RecordingSink, ServerAction};
use team_balancer::types::{GameMode, GameState, Outcome, PlayerId, Team};

/// Poll until `cond` holds, failing the test after a couple of seconds.
async fn eventually<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

struct Fixture {
    server: Arc<MockGameServer>,
    local: Arc<InMemoryLocalStore>,
    service: Arc<MockRatingService>,
    core: BalanceCore,
}

fn fixture(mode: GameMode, config: AppConfig) -> Fixture {
    let server = Arc::new(MockGameServer::new(mode));
    let local = Arc::new(InMemoryLocalStore::new());
    let service = Arc::new(MockRatingService::new());
    let core = BalanceCore::new(
        server.clone(),
        local.clone(),
        service.clone(),
        config,
    )
    .unwrap();
    Fixture {
        server,
        local,
        service,
        core,
    }
}

#[tokio::test]
async fn test_teams_info_defers_then_replies_through_original_sink() {
    let f = fixture(GameMode::Duel, AppConfig::default());
    f.server.add_player("alice", Team::Red);
    f.server.add_player("bob", Team::Blue);
    f.service.set_default_rating("alice", 1500, 10);
    f.service.set_default_rating("bob", 1300, 30);

    let sink = RecordingSink::new();
    let outcome = f
        .core
        .request_teams_info(sink.clone(), GameMode::Duel)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deferred);
    assert!(sink.is_empty());

    eventually(|| !sink.is_empty(), "deferred teams info to reply").await;
    let replies = sink.replies();
    assert_eq!(replies[0], "1500 v 1300 - DIFFERENCE: 200");
    // Swapping the only two players would just mirror the gap.
    assert_eq!(replies[1], "Teams look good!");

    let stats = f.core.stats();
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.outstanding_lookups, 0);
    assert_eq!(stats.cached_players, 2);

    // A second request is served straight from the cache.
    let sink2 = RecordingSink::new();
    let outcome = f
        .core
        .request_teams_info(sink2.clone(), GameMode::Duel)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Complete);
    assert_eq!(sink2.replies()[0], "1500 v 1300 - DIFFERENCE: 200");
    assert_eq!(f.service.request_count(), 1);
}

#[tokio::test]
async fn test_manual_rating_takes_precedence_over_service() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.service.set_default_rating("eve", 1600, 40);

    let sink = RecordingSink::new();
    f.core
        .set_manual_rating("eve", GameMode::ClanArena, 1800, Some(sink.clone()))
        .await
        .unwrap();

    // The manual value is reported without ever touching the service.
    let sink2 = RecordingSink::new();
    let outcome = f
        .core
        .request_rating("eve", sink2.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Complete);
    assert_eq!(
        sink2.replies(),
        vec!["eve's Clan Arena rating is set to 1800 on this server specifically."]
    );
    assert_eq!(f.service.request_count(), 0);

    // Team computations pick the manual value up through the local-first
    // merge, and a later service result must not clobber it.
    f.server.add_player("eve", Team::Red);
    f.server.add_player("mallory", Team::Blue);
    f.service.set_default_rating("mallory", 1400, 50);

    let sink3 = RecordingSink::new();
    f.core
        .request_teams_info(sink3.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| !sink3.is_empty(), "teams info with manual rating").await;
    assert_eq!(sink3.replies()[0], "1800 v 1400 - DIFFERENCE: 400");
}

#[tokio::test]
async fn test_alias_lookup_queries_canonical_name() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.local
        .register_alias(PlayerId::new("smurf"), PlayerId::new("eve"));
    f.service.set_default_rating("eve", 1700, 40);

    let sink = RecordingSink::new();
    let outcome = f
        .core
        .request_rating("smurf", sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deferred);

    eventually(|| !sink.is_empty(), "alias rating reply").await;
    assert_eq!(
        sink.replies(),
        vec!["smurf is an alias of eve, who is ranked #40 in CA with a rating of 1700."]
    );

    // The service only ever saw the canonical identity.
    let requests = f.service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], vec![PlayerId::new("eve")]);

    // Both identities are cached now; neither needs another fetch.
    assert!(f.core.is_cached(&PlayerId::new("smurf"), GameMode::ClanArena));
    assert!(f.core.is_cached(&PlayerId::new("eve"), GameMode::ClanArena));
}

#[tokio::test]
async fn test_failure_threshold_drops_pending_and_resets() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("alice", Team::Red);
    f.server.add_player("bob", Team::Blue);
    f.service.push_response(Err(FetchError::Timeout));
    f.service.push_response(Err(FetchError::Timeout));

    let sink = RecordingSink::new();
    f.core
        .request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();

    // First failure replays the task, which re-defers and fetches again;
    // the second failure reaches the threshold, surfaces a message and
    // drops the queued work.
    eventually(|| !sink.is_empty(), "failure message").await;
    assert_eq!(
        sink.replies(),
        vec!["The connection to the rating service timed out."]
    );
    eventually(
        || f.core.stats().pending_tasks == 0,
        "pending queue to be dropped",
    )
    .await;

    let stats = f.core.stats();
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.outstanding_lookups, 0);
    assert_eq!(f.service.request_count(), 2);

    // The engine recovers: the next request starts a fresh fetch, which
    // succeeds with synthesized data and completes normally.
    let sink2 = RecordingSink::new();
    f.core
        .request_teams_info(sink2.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| !sink2.is_empty(), "recovery after breaker").await;
}

/// Service whose fetches never complete, so lookups stay outstanding.
struct StalledService {
    calls: AtomicUsize,
}

#[async_trait]
impl RatingService for StalledService {
    async fn fetch_batch(
        &self,
        _names: &[PlayerId],
    ) -> Result<ServiceResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_outstanding_lookup_absorbs_concurrent_requests() {
    let server = Arc::new(MockGameServer::new(GameMode::ClanArena));
    server.add_player("alice", Team::Red);
    server.add_player("bob", Team::Blue);
    let service = Arc::new(StalledService {
        calls: AtomicUsize::new(0),
    });
    let core = BalanceCore::new(
        server.clone(),
        Arc::new(InMemoryLocalStore::new()),
        service.clone(),
        AppConfig::default(),
    )
    .unwrap();

    let sink = RecordingSink::new();
    core.request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(
        || service.calls.load(Ordering::SeqCst) == 1,
        "first fetch to start",
    )
    .await;

    // Different operations over the same names fold into the in-flight
    // lookup instead of fetching again.
    core.request_balance(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    core.request_roster_ratings(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    let stats = core.stats();
    assert_eq!(stats.outstanding_lookups, 1);
    assert_eq!(stats.pending_tasks, 3);
}

#[tokio::test]
async fn test_balance_swaps_until_teams_are_even() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("a", Team::Red);
    f.server.add_player("b", Team::Red);
    f.server.add_player("c", Team::Blue);
    f.server.add_player("d", Team::Blue);
    f.service.set_default_rating("a", 2000, 1);
    f.service.set_default_rating("b", 1800, 2);
    f.service.set_default_rating("c", 1200, 3);
    f.service.set_default_rating("d", 1000, 4);

    let sink = RecordingSink::new();
    f.core
        .request_balance(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();

    eventually(
        || f.server.broadcasts().iter().any(|b| b.starts_with("Done!")),
        "balance to finish",
    )
    .await;

    let broadcasts = f.server.broadcasts();
    assert_eq!(broadcasts[0], "Balancing teams...");
    assert_eq!(broadcasts[1], "a <=> c");
    // Equal rounded averages get the celebratory line, not a zero difference.
    assert_eq!(broadcasts[2], "Done! 1500 v 1500 - Holy shit!");

    // The rosters actually changed, and sizes stayed equal.
    assert_eq!(f.server.team_of(&PlayerId::new("a")), Some(Team::Blue));
    assert_eq!(f.server.team_of(&PlayerId::new("c")), Some(Team::Red));
    let teams = f.server.teams().await.unwrap();
    assert_eq!(teams.red.len(), 2);
    assert_eq!(teams.blue.len(), 2);
}

#[tokio::test]
async fn test_balance_evens_out_lopsided_rosters_first() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    for name in ["a", "b", "c", "d"] {
        f.server.add_player(name, Team::Red);
    }
    f.service.set_default_rating("a", 2000, 1);
    f.service.set_default_rating("b", 1800, 2);
    f.service.set_default_rating("c", 1200, 3);
    f.service.set_default_rating("d", 1000, 4);

    let sink = RecordingSink::new();
    f.core
        .request_balance(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();

    eventually(
        || f.server.broadcasts().iter().any(|b| b.starts_with("Done!")),
        "evening and balance to finish",
    )
    .await;

    assert_eq!(f.server.broadcasts()[0], "Evening teams...");
    let teams = f.server.teams().await.unwrap();
    assert_eq!(teams.red.len(), 2);
    assert_eq!(teams.blue.len(), 2);
}

#[tokio::test]
async fn test_suggestion_agreement_executes_switch_in_warmup() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("a1", Team::Red);
    f.server.add_player("a2", Team::Red);
    f.server.add_player("b1", Team::Blue);
    f.server.add_player("b2", Team::Blue);
    f.service.set_default_rating("a1", 1700, 1);
    f.service.set_default_rating("a2", 1700, 2);
    f.service.set_default_rating("b1", 1300, 3);
    f.service.set_default_rating("b2", 1300, 4);

    let sink = RecordingSink::new();
    f.core
        .request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| sink.replies().len() >= 2, "suggestion to surface").await;

    let replies = sink.replies();
    assert_eq!(replies[0], "1700 v 1300 - DIFFERENCE: 400");
    assert_eq!(
        replies[1],
        "SUGGESTION: switch a1 with b1. Type !a to agree."
    );

    // One agreement is not enough.
    f.core.on_player_agree("a1").await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Red));

    // Both agreed during warmup: the switch applies immediately.
    f.core.on_player_agree("b1").await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Blue));
    assert_eq!(f.server.team_of(&PlayerId::new("b1")), Some(Team::Red));

    // The suggestion is consumed; agreeing again does nothing.
    f.core.on_player_agree("a1").await.unwrap();
    f.core.on_player_agree("b1").await.unwrap();
    let switches = f
        .server
        .actions()
        .into_iter()
        .filter(|a| matches!(a, ServerAction::Switch(_, _)))
        .count();
    assert_eq!(switches, 1);
}

#[tokio::test]
async fn test_agreement_during_live_match_waits_for_next_round() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("a1", Team::Red);
    f.server.add_player("a2", Team::Red);
    f.server.add_player("b1", Team::Blue);
    f.server.add_player("b2", Team::Blue);
    f.service.set_default_rating("a1", 1700, 1);
    f.service.set_default_rating("a2", 1700, 2);
    f.service.set_default_rating("b1", 1300, 3);
    f.service.set_default_rating("b2", 1300, 4);
    f.server.set_game_state(GameState::InProgress);

    let sink = RecordingSink::new();
    f.core
        .request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| sink.replies().len() >= 2, "suggestion to surface").await;

    // No round countdown has happened, so the agreement falls outside the
    // window and the switch is deferred to the next round.
    f.core.on_player_agree("a1").await.unwrap();
    f.core.on_player_agree("b1").await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Red));
    assert!(f
        .server
        .broadcasts()
        .contains(&"The switch will be executed at the start of next round.".to_string()));

    // The next countdown applies it.
    f.core.on_round_countdown().await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Blue));
}

#[tokio::test]
async fn test_match_end_discards_agreed_suggestion() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("a1", Team::Red);
    f.server.add_player("a2", Team::Red);
    f.server.add_player("b1", Team::Blue);
    f.server.add_player("b2", Team::Blue);
    f.service.set_default_rating("a1", 1700, 1);
    f.service.set_default_rating("a2", 1700, 2);
    f.service.set_default_rating("b1", 1300, 3);
    f.service.set_default_rating("b2", 1300, 4);
    f.server.set_game_state(GameState::InProgress);

    let sink = RecordingSink::new();
    f.core
        .request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| sink.replies().len() >= 2, "suggestion to surface").await;

    f.core.on_player_agree("a1").await.unwrap();
    f.core.on_player_agree("b1").await.unwrap();
    f.core.on_match_end().await.unwrap();

    // The countdown of the next match must not replay the stale swap.
    f.core.on_round_countdown().await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Red));
}

#[tokio::test]
async fn test_force_do_skips_agreement() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("a1", Team::Red);
    f.server.add_player("a2", Team::Red);
    f.server.add_player("b1", Team::Blue);
    f.server.add_player("b2", Team::Blue);
    f.service.set_default_rating("a1", 1700, 1);
    f.service.set_default_rating("a2", 1700, 2);
    f.service.set_default_rating("b1", 1300, 3);
    f.service.set_default_rating("b2", 1300, 4);

    let sink = RecordingSink::new();
    f.core
        .request_teams_info(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| sink.replies().len() >= 2, "suggestion to surface").await;

    f.core.on_force_do().await.unwrap();
    assert_eq!(f.server.team_of(&PlayerId::new("a1")), Some(Team::Blue));
}

#[tokio::test]
async fn test_low_rated_player_moved_to_spectator_on_connect() {
    let mut config = AppConfig::default();
    config.gate.minimum_rating = 1000;
    let f = fixture(GameMode::ClanArena, config);
    f.server.add_player("rookie", Team::Red);
    f.service.set_default_rating("rookie", 800, 9000);

    f.core.on_player_connect("rookie").await.unwrap();

    eventually(
        || f.server.team_of(&PlayerId::new("rookie")) == Some(Team::Spectator),
        "gate to move the player",
    )
    .await;
    assert!(f.server.actions().iter().any(|a| matches!(
        a,
        ServerAction::Tell(name, msg)
            if name == &PlayerId::new("rookie") && msg.contains("at least 1000")
    )));
}

#[tokio::test]
async fn test_compliant_player_untouched_by_gate() {
    let mut config = AppConfig::default();
    config.gate.minimum_rating = 1000;
    config.gate.maximum_rating = 2000;
    let f = fixture(GameMode::ClanArena, config);
    f.server.add_player("solid", Team::Blue);
    f.service.set_default_rating("solid", 1500, 100);

    f.core.on_player_connect("solid").await.unwrap();
    eventually(
        || f.core.is_cached(&PlayerId::new("solid"), GameMode::ClanArena),
        "connect prefetch",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.server.team_of(&PlayerId::new("solid")), Some(Team::Blue));
    assert!(f.server.actions().iter().all(|a| !matches!(
        a,
        ServerAction::Put(_, _) | ServerAction::Mute(_) | ServerAction::Kickban(_)
    )));
}

#[tokio::test]
async fn test_gate_judges_unclamped_rating() {
    // Cached values are clamped to the ceiling, but admission must judge
    // the player's true rating.
    let mut config = AppConfig::default();
    config.balance.ceiling_rating = 1600;
    config.gate.maximum_rating = 2000;
    config.gate.minimum_rating = 1;
    let f = fixture(GameMode::ClanArena, config);
    f.server.add_player("pro", Team::Red);
    f.service.set_default_rating("pro", 2400, 5);

    f.core.on_player_connect("pro").await.unwrap();

    eventually(
        || f.server.team_of(&PlayerId::new("pro")) == Some(Team::Spectator),
        "gate to act on the unclamped rating",
    )
    .await;
    assert!(f.server.actions().iter().any(|a| matches!(
        a,
        ServerAction::Tell(_, msg) if msg.contains("at most 2000") && msg.contains("2400")
    )));
}

#[tokio::test]
async fn test_roster_ratings_sorted_by_rating() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.server.add_player("weak", Team::Red);
    f.server.add_player("strong", Team::Red);
    f.server.add_player("mid", Team::Blue);
    f.service.set_default_rating("weak", 1100, 3);
    f.service.set_default_rating("strong", 1900, 1);
    f.service.set_default_rating("mid", 1500, 2);

    let sink = RecordingSink::new();
    f.core
        .request_roster_ratings(sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| sink.replies().len() >= 2, "roster listing").await;

    let replies = sink.replies();
    assert_eq!(replies[0], "red: strong: 1900, weak: 1100");
    assert_eq!(replies[1], "blue: mid: 1500");
}

#[tokio::test]
async fn test_removing_manual_rating_falls_back_to_service() {
    let f = fixture(GameMode::ClanArena, AppConfig::default());
    f.service.set_default_rating("eve", 1600, 40);

    f.core
        .set_manual_rating("eve", GameMode::ClanArena, 1800, None)
        .await
        .unwrap();
    f.core
        .remove_manual_rating("eve", GameMode::ClanArena, None)
        .await
        .unwrap();

    let sink = RecordingSink::new();
    f.core
        .request_rating("eve", sink.clone(), GameMode::ClanArena)
        .await
        .unwrap();
    eventually(|| !sink.is_empty(), "service rating after removal").await;
    assert_eq!(
        sink.replies(),
        vec!["eve is ranked #40 in CA with a rating of 1600."]
    );
}
