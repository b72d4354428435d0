//! Engine core tying cache, lookups, pending tasks and balancing together
//!
//! `BalanceCore` is the caller-facing API. Operations that need ratings not
//! yet cached defer themselves into the pending queue, dispatch a batch
//! fetch and return `Outcome::Deferred`; fetch workers re-enter through the
//! completion callbacks, which merge results and replay everything pending.
//! All shared mutable state (cache, outstanding lookups, failure counter,
//! pending queue) lives behind one mutex that is never held across awaits,
//! so replayed tasks can re-enter lookup-requesting code freely.

use crate::config::AppConfig;
use crate::engine::balancer::{self, EloMap};
use crate::engine::suggestion::{AgreeOutcome, SwapNegotiation};
use crate::error::{BalanceError, Result};
use crate::gate::{self, FlagList, GateAction};
use crate::lookup::{FetchError, LookupTable, OutstandingLookup, RatingService, ServiceResponse};
use crate::metrics::MetricsCollector;
use crate::pending::{PendingQueue, PendingTask};
use crate::rating::{ClampSettings, LocalStore, RatingStore};
use crate::server::{GameServer, Reply, ReplySink};
use crate::types::{
    GameMode, GameState, Outcome, PlayerId, RatingBatchEntry, RawRating, Team,
};
use crate::utils::{current_timestamp, is_sane, round_rating};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a fetch request consults its sources
#[derive(Debug, Clone, Copy)]
struct FetchOptions {
    use_local: bool,
    use_aliases: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_local: true,
            use_aliases: true,
        }
    }
}

/// Shared mutable state guarded by the one engine lock
struct SharedState {
    store: RatingStore,
    lookups: LookupTable,
    pending: PendingQueue,
    fails: u32,
}

/// Introspection snapshot of the engine's shared state
#[derive(Debug, Clone, Default)]
pub struct CoreStats {
    pub cached_players: usize,
    pub outstanding_lookups: usize,
    pub pending_tasks: usize,
    pub consecutive_failures: u32,
}

struct CoreInner {
    shared: Mutex<SharedState>,
    negotiation: Mutex<SwapNegotiation>,
    flags: FlagList,
    server: Arc<dyn GameServer>,
    local: Arc<dyn LocalStore>,
    service: Arc<dyn RatingService>,
    config: AppConfig,
    metrics: MetricsCollector,
}

/// The balancing engine core
#[derive(Clone)]
pub struct BalanceCore {
    inner: Arc<CoreInner>,
}

impl BalanceCore {
    pub fn new(
        server: Arc<dyn GameServer>,
        local: Arc<dyn LocalStore>,
        service: Arc<dyn RatingService>,
        config: AppConfig,
    ) -> Result<Self> {
        let metrics = MetricsCollector::new()?;
        Ok(Self::with_metrics(server, local, service, config, metrics))
    }

    pub fn with_metrics(
        server: Arc<dyn GameServer>,
        local: Arc<dyn LocalStore>,
        service: Arc<dyn RatingService>,
        config: AppConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                shared: Mutex::new(SharedState {
                    store: RatingStore::new(),
                    lookups: LookupTable::new(),
                    pending: PendingQueue::new(),
                    fails: 0,
                }),
                negotiation: Mutex::new(SwapNegotiation::new()),
                flags: FlagList::new(),
                server,
                local,
                service,
                config,
                metrics,
            }),
        }
    }

    fn shared(&self) -> Result<MutexGuard<'_, SharedState>> {
        self.inner.shared.lock().map_err(|_| {
            BalanceError::InternalError {
                message: "Failed to acquire engine state lock".to_string(),
            }
            .into()
        })
    }

    fn negotiation(&self) -> Result<MutexGuard<'_, SwapNegotiation>> {
        self.inner.negotiation.lock().map_err(|_| {
            BalanceError::InternalError {
                message: "Failed to acquire negotiation lock".to_string(),
            }
            .into()
        })
    }

    fn clamp(&self) -> ClampSettings {
        ClampSettings::new(
            self.inner.config.balance.floor_rating,
            self.inner.config.balance.ceiling_rating,
        )
    }

    fn update_gauges(&self, shared: &SharedState) {
        let metrics = &self.inner.metrics;
        metrics.cache.cached_players.set(shared.store.len() as i64);
        metrics
            .lookup
            .outstanding_lookups
            .set(shared.lookups.len() as i64);
        metrics.engine.pending_tasks.set(shared.pending.len() as i64);
    }

    fn reply_to(reply: &Reply, message: &str) {
        if let Some(sink) = reply {
            sink.reply(message);
        }
    }

    /// Introspection snapshot for health reporting and tests.
    pub fn stats(&self) -> CoreStats {
        match self.shared() {
            Ok(shared) => CoreStats {
                cached_players: shared.store.len(),
                outstanding_lookups: shared.lookups.len(),
                pending_tasks: shared.pending.len(),
                consecutive_failures: shared.fails,
            },
            Err(_) => CoreStats::default(),
        }
    }

    pub fn is_cached(&self, name: &PlayerId, mode: GameMode) -> bool {
        self.shared()
            .map(|shared| shared.store.is_cached(name, mode))
            .unwrap_or(false)
    }

    pub fn is_flagged(&self, name: &PlayerId) -> bool {
        self.inner.flags.is_flagged(name)
    }

    // ------------------------------------------------------------------
    // Caller-facing operations
    // ------------------------------------------------------------------

    /// Report average team ratings, their difference and a swap suggestion.
    pub async fn request_teams_info(
        &self,
        reply: Arc<dyn ReplySink>,
        mode: GameMode,
    ) -> Result<Outcome> {
        self.teams_info(Some(reply), mode).await
    }

    /// Rearrange the rosters until no improving swap remains.
    pub async fn request_balance(
        &self,
        reply: Arc<dyn ReplySink>,
        mode: GameMode,
    ) -> Result<Outcome> {
        self.average_balance(Some(reply), mode).await
    }

    /// Report one player's rating: a manually-set value takes precedence,
    /// otherwise the cached/fetched service rating is reported.
    pub async fn request_rating(
        &self,
        raw_name: &str,
        reply: Arc<dyn ReplySink>,
        mode: GameMode,
    ) -> Result<Outcome> {
        let name = PlayerId::new(raw_name);
        if !is_sane(name.as_str()) {
            reply.reply("Invalid player name. Only letters, numbers and underscores.");
            return Ok(Outcome::Complete);
        }

        let manual = self.inner.local.manual_ratings(&name)?;
        if let Some((_, elo)) = manual.iter().find(|(m, _)| *m == mode) {
            reply.reply(&format!(
                "{}'s {} rating is set to {} on this server specifically.",
                name, mode, elo
            ));
            return Ok(Outcome::Complete);
        }

        self.individual_rating(name, Some(reply), mode).await
    }

    /// List every teamed player's rating for the active mode.
    pub async fn request_roster_ratings(
        &self,
        reply: Arc<dyn ReplySink>,
        mode: GameMode,
    ) -> Result<Outcome> {
        self.roster_ratings(Some(reply), mode).await
    }

    /// Set a manual rating locally; the cache entry is invalidated so the
    /// next read picks the new value up.
    pub async fn set_manual_rating(
        &self,
        raw_name: &str,
        mode: GameMode,
        rating: i32,
        reply: Reply,
    ) -> Result<()> {
        use crate::rating::ManualRatingUpdate;

        let name = PlayerId::new(raw_name);
        let update = self.inner.local.set_manual_rating(&name, mode, rating)?;
        let message = match update {
            ManualRatingUpdate::NewPlayer => format!(
                "{} was added as a player with a {} {} rating.",
                name, rating, mode
            ),
            ManualRatingUpdate::Updated => {
                format!("{}'s {} rating has been updated to {}.", name, mode, rating)
            }
            ManualRatingUpdate::Created => {
                format!("{}'s {} rating was set to {}.", name, mode, rating)
            }
        };
        Self::reply_to(&reply, &message);

        let mut shared = self.shared()?;
        shared.store.clear(&name, mode);
        self.update_gauges(&shared);
        Ok(())
    }

    /// Remove a manual rating; the cache entry is invalidated.
    pub async fn remove_manual_rating(
        &self,
        raw_name: &str,
        mode: GameMode,
        reply: Reply,
    ) -> Result<()> {
        let name = PlayerId::new(raw_name);
        let removed = self.inner.local.remove_manual_rating(&name, mode)?;
        if !removed {
            Self::reply_to(&reply, &format!("I have no {} rating data on {}.", mode, name));
            return Ok(());
        }
        Self::reply_to(
            &reply,
            &format!("{}'s {} rating data has been removed.", name, mode),
        );

        let mut shared = self.shared()?;
        shared.store.clear(&name, mode);
        self.update_gauges(&shared);
        Ok(())
    }

    /// Enforce the rating admission policy for a set of players.
    pub async fn check_rating_requirement(
        &self,
        names: &[PlayerId],
        reply: Reply,
        mode: GameMode,
    ) -> Result<Outcome> {
        self.rating_check(names.to_vec(), reply, mode).await
    }

    // ------------------------------------------------------------------
    // Event hooks
    // ------------------------------------------------------------------

    /// A player connected: prefetch their rating and check admission.
    pub async fn on_player_connect(&self, raw_name: &str) -> Result<()> {
        let name = PlayerId::new(raw_name);
        let info = self.inner.server.game_info().await?;

        let cached = self.is_cached(&name, info.mode);
        if !cached {
            self.request_ratings(vec![name.clone()], info.mode, None, FetchOptions::default())
                .await?;
        }
        self.rating_check(vec![name], None, info.mode).await?;
        Ok(())
    }

    /// A player switched teams: flagged players go straight back to
    /// spectator, everyone else gets an admission check.
    pub async fn on_team_switch(&self, raw_name: &str, new_team: Team) -> Result<()> {
        if new_team == Team::Spectator {
            return Ok(());
        }
        let name = PlayerId::new(raw_name);
        if self.inner.flags.is_flagged(&name) {
            self.inner.server.put(&name, Team::Spectator).await?;
            return Ok(());
        }
        let info = self.inner.server.game_info().await?;
        self.rating_check(vec![name], None, info.mode).await?;
        Ok(())
    }

    /// Round countdown: apply a fully-agreed swap and remember the instant
    /// for the agree window.
    pub async fn on_round_countdown(&self) -> Result<()> {
        let execute = {
            let mut negotiation = self.negotiation()?;
            let execute = negotiation.both_agreed();
            negotiation.note_countdown(current_timestamp());
            execute
        };
        if execute {
            self.execute_suggestion().await?;
        }
        Ok(())
    }

    /// Match end: clear any suggestion so no stale swap carries into a
    /// rematch.
    pub async fn on_match_end(&self) -> Result<()> {
        self.negotiation()?.reset();
        Ok(())
    }

    /// One of the suggested players agreed to the swap.
    pub async fn on_player_agree(&self, raw_name: &str) -> Result<()> {
        let name = PlayerId::new(raw_name);
        let outcome = { self.negotiation()?.agree(&name) };
        if outcome != AgreeOutcome::BothAgreed {
            return Ok(());
        }

        let info = self.inner.server.game_info().await?;
        if info.state == GameState::InProgress {
            let in_window = {
                self.negotiation()?
                    .within_agree_window(current_timestamp(), self.inner.config.balance.agree_window())
            };
            if !in_window {
                self.inner
                    .server
                    .broadcast("The switch will be executed at the start of next round.")
                    .await?;
                return Ok(());
            }
        }
        self.execute_suggestion().await
    }

    /// Force the suggested swap through without agreement.
    pub async fn on_force_do(&self) -> Result<()> {
        let has_pair = { self.negotiation()?.suggested_pair().is_some() };
        if has_pair {
            self.execute_suggestion().await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup coordination
    // ------------------------------------------------------------------

    /// Make sure every name is cached for `mode`. When data is missing the
    /// operation is queued (once) and a fetch for the uncovered names is
    /// dispatched; returns whether the caller can proceed now.
    async fn ensure_cached(
        &self,
        names: &[PlayerId],
        mode: GameMode,
        reply: Reply,
        task: PendingTask,
        options: FetchOptions,
    ) -> Result<bool> {
        let missing = {
            let shared = self.shared()?;
            shared.store.uncached(names, mode)
        };
        if missing.is_empty() {
            return Ok(true);
        }

        let to_fetch = {
            let mut shared = self.shared()?;
            let uncovered = shared.lookups.filter_uncovered(missing);
            if shared.pending.enqueue(task) {
                debug!(pending = shared.pending.len(), "operation deferred");
            }
            self.update_gauges(&shared);
            uncovered
        };

        if !to_fetch.is_empty() {
            self.request_ratings(to_fetch, mode, reply, options).await?;
        }
        Ok(false)
    }

    /// Issue an asynchronous batch fetch for the given names, consulting the
    /// local store first and skipping names already covered by an
    /// outstanding lookup. Returns whether a fetch was dispatched.
    async fn request_ratings(
        &self,
        names: Vec<PlayerId>,
        mode: GameMode,
        reply: Reply,
        options: FetchOptions,
    ) -> Result<bool> {
        let mut working = names;

        if options.use_local && self.inner.config.balance.use_local_ratings {
            let mut batch = Vec::new();
            let mut still_missing = Vec::new();
            for name in working {
                let manual = self.inner.local.manual_ratings(&name)?;
                if manual.is_empty() {
                    still_missing.push(name);
                    continue;
                }
                let mut entry = RatingBatchEntry::new(name.clone());
                let mut covers_mode = false;
                for (m, elo) in manual {
                    if m == mode {
                        covers_mode = true;
                    }
                    entry.modes.insert(m, RawRating { elo, rank: -1 });
                }
                batch.push(entry);
                if !covers_mode {
                    still_missing.push(name);
                }
            }
            if !batch.is_empty() {
                let mut shared = self.shared()?;
                shared.store.merge(batch, &self.clamp());
                self.inner.metrics.cache.merges_total.inc();
                self.update_gauges(&shared);
            }
            working = still_missing;

            // Local data covered everyone: whatever was blocked can run now.
            if working.is_empty() {
                self.replay_pending().await;
                return Ok(false);
            }
        }

        if !mode.is_service_supported() {
            debug!(?mode, "mode not covered by the rating service, skipping fetch");
            return Ok(false);
        }

        let use_aliases = options.use_aliases && self.inner.config.balance.use_aliases;
        let mut resolved: Vec<(PlayerId, Option<PlayerId>)> = Vec::with_capacity(working.len());
        for name in working {
            let canonical = if use_aliases {
                self.inner.local.resolve_alias(&name)?
            } else {
                None
            };
            if let Some(real) = &canonical {
                debug!(alias = %name, real = %real, "resolved alias for lookup");
            }
            resolved.push((name, canonical));
        }

        // The coverage filter and the registration share one lock
        // acquisition: names a concurrently registered lookup already
        // covers are dropped here instead of being fetched twice.
        let (id, query) = {
            let mut shared = self.shared()?;
            let mut covered: HashSet<PlayerId> = HashSet::new();
            let mut aliases: HashMap<PlayerId, PlayerId> = HashMap::new();
            let mut query = Vec::with_capacity(resolved.len());
            for (name, canonical) in resolved {
                if shared.lookups.covers(&name)
                    || canonical
                        .as_ref()
                        .map_or(false, |real| shared.lookups.covers(real))
                {
                    continue;
                }
                covered.insert(name.clone());
                match canonical {
                    Some(real) => {
                        covered.insert(real.clone());
                        aliases.insert(real.clone(), name);
                        query.push(real);
                    }
                    None => query.push(name),
                }
            }
            if query.is_empty() {
                return Ok(false);
            }
            let id = shared
                .lookups
                .register(OutstandingLookup::new(covered, aliases, reply));
            self.update_gauges(&shared);
            (id, query)
        };
        self.inner.metrics.lookup.fetches_dispatched_total.inc();
        info!(lookup = %id, players = query.len(), "dispatching rating fetch");

        let core = self.clone();
        tokio::spawn(async move {
            match core.inner.service.fetch_batch(&query).await {
                Ok(response) => core.on_fetch_succeeded(id, response).await,
                Err(err) => core.on_fetch_failed(id, err).await,
            }
        });
        Ok(true)
    }

    /// Completion callback for a successful fetch: merge, reset the failure
    /// counter, drop the lookup, then replay pending work.
    pub async fn on_fetch_succeeded(&self, id: Uuid, response: ServiceResponse) {
        {
            let mut shared = match self.shared() {
                Ok(shared) => shared,
                Err(e) => {
                    error!(error = %e, "dropping fetch result");
                    return;
                }
            };
            let Some(lookup) = shared.lookups.remove(id) else {
                warn!(lookup = %id, "completion for unknown lookup");
                return;
            };
            let batch = response.into_batch(&lookup.aliases);
            shared.store.merge(batch, &self.clamp());
            shared.fails = 0;
            self.inner.metrics.cache.merges_total.inc();
            self.update_gauges(&shared);
        }
        debug!(lookup = %id, "rating fetch merged");
        self.replay_pending().await;
    }

    /// Completion callback for a failed fetch: count the failure, surface a
    /// message once the threshold is reached, drop the lookup, then replay
    /// (which trips the breaker when over the threshold).
    pub async fn on_fetch_failed(&self, id: Uuid, err: FetchError) {
        let kind = match &err {
            FetchError::Timeout => "timeout",
            FetchError::Status(_) => "status",
            FetchError::Malformed(_) => "malformed",
        };
        self.inner
            .metrics
            .lookup
            .fetch_failures_total
            .with_label_values(&[kind])
            .inc();
        warn!(lookup = %id, error = %err, "rating fetch failed");

        let notify = {
            let mut shared = match self.shared() {
                Ok(shared) => shared,
                Err(e) => {
                    error!(error = %e, "dropping fetch failure");
                    return;
                }
            };
            shared.fails += 1;
            let lookup = shared.lookups.remove(id);
            let over_threshold = shared.fails >= self.inner.config.rating_service.fails_allowed;
            self.update_gauges(&shared);
            lookup.and_then(|l| if over_threshold { l.reply } else { None })
        };

        if let Some(reply) = notify {
            let message = match err {
                FetchError::Timeout => "The connection to the rating service timed out.".to_string(),
                FetchError::Status(code) => format!(
                    "The connection to the rating service failed with error code: {}",
                    code
                ),
                FetchError::Malformed(_) => {
                    "The rating service returned a malformed response.".to_string()
                }
            };
            reply.reply(&message);
        }

        self.replay_pending().await;
    }

    /// Re-dispatch everything pending, unless the failure threshold has been
    /// reached, in which case all queued work is dropped and the counter
    /// resets so the next externally triggered event starts fresh.
    async fn replay_pending(&self) {
        let tasks = {
            let mut shared = match self.shared() {
                Ok(shared) => shared,
                Err(_) => return,
            };
            let allowed = self.inner.config.rating_service.fails_allowed;
            if allowed != 0 && shared.fails >= allowed {
                shared.fails = 0;
                let dropped = shared.pending.len();
                shared.pending.clear();
                self.inner.metrics.lookup.breaker_trips_total.inc();
                self.update_gauges(&shared);
                warn!(dropped, "failure threshold reached, dropping pending tasks");
                return;
            }
            shared.pending.drain()
        };
        if tasks.is_empty() {
            return;
        }

        self.inner.metrics.engine.replays_total.inc();
        for task in tasks {
            let kind = task.kind();
            match self.dispatch(task.clone()).await {
                Ok(Outcome::Complete) => debug!(task = kind, "replayed task completed"),
                Ok(Outcome::Deferred) => debug!(task = kind, "replayed task still blocked"),
                Err(e) => {
                    // One bad task must not starve the rest of the queue.
                    error!(task = kind, error = %e, "replayed task failed, keeping it queued");
                    if let Ok(mut shared) = self.shared() {
                        shared.pending.enqueue(task);
                        self.update_gauges(&shared);
                    }
                }
            }
        }
        if let Ok(shared) = self.shared() {
            self.update_gauges(&shared);
        }
    }

    /// Boxed so replayed tasks can recurse back into deferring operations.
    fn dispatch(
        &self,
        task: PendingTask,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome>> + Send + '_>> {
        Box::pin(async move {
            match task {
                PendingTask::TeamsInfo { mode, reply } => self.teams_info(reply, mode).await,
                PendingTask::Balance { mode, reply } => self.average_balance(reply, mode).await,
                PendingTask::IndividualRating { name, mode, reply } => {
                    self.individual_rating(name, reply, mode).await
                }
                PendingTask::RosterRatings { mode, reply } => {
                    self.roster_ratings(reply, mode).await
                }
                PendingTask::RatingCheck { names, mode, reply } => {
                    self.rating_check(names, reply, mode).await
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Deferred operation bodies
    // ------------------------------------------------------------------

    fn elo_snapshot(&self, players: &[PlayerId], mode: GameMode) -> Result<EloMap> {
        let shared = self.shared()?;
        let mut map = EloMap::with_capacity(players.len());
        for player in players {
            match shared.store.get(player, mode) {
                Some(record) => {
                    map.insert(player.clone(), record.elo);
                }
                None => {
                    warn!(player = %player, ?mode, "player missing from cache snapshot");
                    map.insert(player.clone(), 0);
                }
            }
        }
        Ok(map)
    }

    async fn teams_info(&self, reply: Reply, mode: GameMode) -> Result<Outcome> {
        let teams = self.inner.server.teams().await?;
        if teams.red.len() != teams.blue.len() {
            Self::reply_to(&reply, "Both teams should have the same number of players.");
            return Ok(Outcome::Complete);
        }

        let players = teams.teamed_players();
        let task = PendingTask::TeamsInfo {
            mode,
            reply: reply.clone(),
        };
        if !self
            .ensure_cached(&players, mode, reply.clone(), task, FetchOptions::default())
            .await?
        {
            return Ok(Outcome::Deferred);
        }

        let elos = self.elo_snapshot(&players, mode)?;
        let avg_red = balancer::team_average(&teams.red, &elos);
        let avg_blue = balancer::team_average(&teams.blue, &elos);
        let (red, blue) = (round_rating(avg_red), round_rating(avg_blue));
        Self::reply_to(&reply, &Self::averages_line(red, blue));

        let threshold = f64::from(self.inner.config.balance.minimum_suggestion_diff);
        match balancer::suggest_swap(&teams.red, &teams.blue, &elos) {
            Some(swap) if swap.improvement >= threshold => {
                Self::reply_to(
                    &reply,
                    &format!(
                        "SUGGESTION: switch {} with {}. Type !a to agree.",
                        swap.red_player, swap.blue_player
                    ),
                );
                self.inner.metrics.engine.suggestions_total.inc();
                self.negotiation()?.propose(swap.red_player, swap.blue_player);
            }
            _ => {
                Self::reply_to(&reply, "Teams look good!");
                self.negotiation()?.reset();
            }
        }
        Ok(Outcome::Complete)
    }

    async fn average_balance(&self, reply: Reply, mode: GameMode) -> Result<Outcome> {
        let teams = self.inner.server.teams().await?;
        if teams.total_teamed() % 2 == 1 {
            Self::reply_to(
                &reply,
                "I can't balance when the total number of players is not an even number.",
            );
            return Ok(Outcome::Complete);
        }

        let players = teams.teamed_players();
        let task = PendingTask::Balance {
            mode,
            reply: reply.clone(),
        };
        if !self
            .ensure_cached(&players, mode, reply.clone(), task, FetchOptions::default())
            .await?
        {
            return Ok(Outcome::Deferred);
        }

        let elos = self.elo_snapshot(&players, mode)?;
        let mut red = teams.red.clone();
        let mut blue = teams.blue.clone();

        let moves = balancer::moves_to_even(&red, &blue);
        if !moves.is_empty() {
            self.inner.server.broadcast("Evening teams...").await?;
            for (player, team) in moves {
                self.inner.server.put(&player, team).await?;
                match team {
                    Team::Blue => {
                        red.retain(|p| p != &player);
                        blue.push(player);
                    }
                    Team::Red => {
                        blue.retain(|p| p != &player);
                        red.push(player);
                    }
                    Team::Spectator => {}
                }
            }
        }

        let mut swap = balancer::suggest_swap(&red, &blue, &elos);
        if swap.is_none() {
            Self::reply_to(&reply, "Teams are good! Nothing to balance.");
            return Ok(Outcome::Complete);
        }

        self.inner.server.broadcast("Balancing teams...").await?;
        while let Some(s) = swap {
            self.inner
                .server
                .broadcast(&format!("{} <=> {}", s.red_player, s.blue_player))
                .await?;
            self.inner.server.switch(&s.red_player, &s.blue_player).await?;
            self.inner.metrics.engine.swaps_applied_total.inc();

            red.retain(|p| p != &s.red_player);
            blue.retain(|p| p != &s.blue_player);
            red.push(s.blue_player);
            blue.push(s.red_player);
            swap = balancer::suggest_swap(&red, &blue, &elos);
        }

        let avg_red = balancer::team_average(&red, &elos);
        let avg_blue = balancer::team_average(&blue, &elos);
        let (r, b) = (round_rating(avg_red), round_rating(avg_blue));
        self.inner
            .server
            .broadcast(&format!("Done! {}", Self::averages_line(r, b)))
            .await?;
        Ok(Outcome::Complete)
    }

    /// Rounded team averages as reported to players. Equal averages get
    /// their own exclamation instead of a zero difference.
    fn averages_line(red: i64, blue: i64) -> String {
        if red == blue {
            format!("{} v {} - Holy shit!", red, blue)
        } else {
            format!("{} v {} - DIFFERENCE: {}", red, blue, (red - blue).abs())
        }
    }

    async fn individual_rating(
        &self,
        name: PlayerId,
        reply: Reply,
        mode: GameMode,
    ) -> Result<Outcome> {
        let task = PendingTask::IndividualRating {
            name: name.clone(),
            mode,
            reply: reply.clone(),
        };
        // Manual ratings were already consulted by the caller; go straight
        // to the service, but still resolve aliases.
        let options = FetchOptions {
            use_local: false,
            use_aliases: true,
        };
        if !self
            .ensure_cached(std::slice::from_ref(&name), mode, reply.clone(), task, options)
            .await?
        {
            return Ok(Outcome::Deferred);
        }

        let (record, alias) = {
            let shared = self.shared()?;
            (
                shared.store.get(&name, mode),
                shared.store.alias_of(&name).cloned(),
            )
        };
        let Some(record) = record else {
            warn!(player = %name, ?mode, "rating vanished between check and read");
            return Ok(Outcome::Complete);
        };

        let mode_name = mode.short_name().to_uppercase();
        if record.rank == 0 {
            Self::reply_to(
                &reply,
                &format!("The rating service has no data on {} for {}.", name, mode_name),
            );
            return Ok(Outcome::Complete);
        }

        let message = match (alias, record.real_elo) {
            (Some(real), Some(real_elo)) => format!(
                "{} is an alias of {}, who is ranked #{} in {} with a rating of {}, but treated as {}.",
                name, real, record.rank, mode_name, real_elo, record.elo
            ),
            (Some(real), None) => format!(
                "{} is an alias of {}, who is ranked #{} in {} with a rating of {}.",
                name, real, record.rank, mode_name, record.elo
            ),
            (None, Some(real_elo)) => format!(
                "{} is ranked #{} in {} with a rating of {}, but treated as {}.",
                name, record.rank, mode_name, real_elo, record.elo
            ),
            (None, None) => format!(
                "{} is ranked #{} in {} with a rating of {}.",
                name, record.rank, mode_name, record.elo
            ),
        };
        Self::reply_to(&reply, &message);
        Ok(Outcome::Complete)
    }

    async fn roster_ratings(&self, reply: Reply, mode: GameMode) -> Result<Outcome> {
        let teams = self.inner.server.teams().await?;
        let players = teams.teamed_players();
        if players.is_empty() {
            Self::reply_to(&reply, "No players on a team.");
            return Ok(Outcome::Complete);
        }

        let task = PendingTask::RosterRatings {
            mode,
            reply: reply.clone(),
        };
        if !self
            .ensure_cached(&players, mode, reply.clone(), task, FetchOptions::default())
            .await?
        {
            return Ok(Outcome::Deferred);
        }

        let elos = self.elo_snapshot(&players, mode)?;
        let line = |label: &str, team: &[PlayerId]| {
            let mut sorted = team.to_vec();
            sorted.sort_by_key(|p| std::cmp::Reverse(elos.get(p).copied().unwrap_or(0)));
            let listed: Vec<String> = sorted
                .iter()
                .map(|p| format!("{}: {}", p, elos.get(p).copied().unwrap_or(0)))
                .collect();
            format!("{}: {}", label, listed.join(", "))
        };
        Self::reply_to(&reply, &line("red", &teams.red));
        Self::reply_to(&reply, &line("blue", &teams.blue));
        Ok(Outcome::Complete)
    }

    async fn rating_check(
        &self,
        names: Vec<PlayerId>,
        reply: Reply,
        mode: GameMode,
    ) -> Result<Outcome> {
        if !self.inner.config.gate.is_enabled() {
            return Ok(Outcome::Complete);
        }

        let task = PendingTask::RatingCheck {
            names: names.clone(),
            mode,
            reply: reply.clone(),
        };
        if !self
            .ensure_cached(&names, mode, reply.clone(), task, FetchOptions::default())
            .await?
        {
            return Ok(Outcome::Deferred);
        }

        let actions = {
            let shared = self.shared()?;
            gate::evaluate(&names, &shared.store, mode, &self.inner.config.gate)
        };
        if actions.is_empty() {
            return Ok(Outcome::Complete);
        }

        let teams = self.inner.server.teams().await?;
        for action in actions {
            let player = action.player();
            let on_team = teams.red.contains(player) || teams.blue.contains(player);
            match action {
                GateAction::MoveToSpectator { name, message } => {
                    if on_team {
                        self.inner.server.put(&name, Team::Spectator).await?;
                        self.inner.server.tell(&name, &message).await?;
                    }
                }
                GateAction::DelayedRemoval { name } => {
                    if on_team {
                        self.inner.server.put(&name, Team::Spectator).await?;
                    }
                    self.inner.flags.flag(&name);
                    self.inner.server.mute(&name).await?;
                    info!(player = %name, "flagged for delayed removal");
                    self.spawn_delayed_removal(name);
                }
            }
        }
        Ok(Outcome::Complete)
    }

    fn spawn_delayed_removal(&self, name: PlayerId) {
        let core = self.clone();
        tokio::spawn(async move {
            let gate = &core.inner.config.gate;
            tokio::time::sleep(gate.kick_warning_delay()).await;
            if let Err(e) = core
                .inner
                .server
                .tell(
                    &name,
                    "You do not meet the rating requirements on this server. You will be kicked shortly.",
                )
                .await
            {
                warn!(player = %name, error = %e, "removal warning failed");
            }
            let remaining = gate.kick_delay().saturating_sub(gate.kick_warning_delay());
            tokio::time::sleep(remaining).await;
            if let Err(e) = core.inner.server.kickban(&name).await {
                error!(player = %name, error = %e, "kickban failed");
            }
            core.inner.flags.unflag(&name);
        });
    }

    async fn execute_suggestion(&self) -> Result<()> {
        let pair = { self.negotiation()?.take_pair() };
        if let Some((a, b)) = pair {
            info!(red = %a, blue = %b, "executing suggested switch");
            self.inner.server.switch(&a, &b).await?;
            self.inner.metrics.engine.swaps_applied_total.inc();
        }
        Ok(())
    }
}
