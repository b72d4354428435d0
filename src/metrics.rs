//! Metrics collection using Prometheus
//!
//! Counters and gauges covering the lookup coordinator, the rating cache and
//! the balancing engine. Exposition is left to the embedding application via
//! `registry()`.

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Main metrics collector for the balancing engine
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    pub lookup: LookupMetrics,
    pub cache: CacheMetrics,
    pub engine: EngineMetrics,
}

/// Lookup coordinator metrics
#[derive(Clone)]
pub struct LookupMetrics {
    /// Batch fetches dispatched to the rating service
    pub fetches_dispatched_total: IntCounter,

    /// Failed fetches by kind (timeout, status, malformed)
    pub fetch_failures_total: IntCounterVec,

    /// Circuit breaker trips (pending work dropped)
    pub breaker_trips_total: IntCounter,

    /// Currently outstanding lookups
    pub outstanding_lookups: IntGauge,
}

/// Rating cache metrics
#[derive(Clone)]
pub struct CacheMetrics {
    /// Players with at least one cached record
    pub cached_players: IntGauge,

    /// Batches merged into the cache
    pub merges_total: IntCounter,
}

/// Balancing engine metrics
#[derive(Clone)]
pub struct EngineMetrics {
    /// Roster swaps applied (balance runs and agreed suggestions)
    pub swaps_applied_total: IntCounter,

    /// Swap suggestions surfaced to players
    pub suggestions_total: IntCounter,

    /// Deferred tasks currently queued
    pub pending_tasks: IntGauge,

    /// Task replays triggered by fetch completions
    pub replays_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with a custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let lookup = LookupMetrics::new(&registry)?;
        let cache = CacheMetrics::new(&registry)?;
        let engine = EngineMetrics::new(&registry)?;
        Ok(Self {
            registry,
            lookup,
            cache,
            engine,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

impl LookupMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let fetches_dispatched_total = IntCounter::with_opts(Opts::new(
            "balancer_fetches_dispatched_total",
            "Batch fetches dispatched to the rating service",
        ))?;
        let fetch_failures_total = IntCounterVec::new(
            Opts::new(
                "balancer_fetch_failures_total",
                "Failed rating service fetches by kind",
            ),
            &["kind"],
        )?;
        let breaker_trips_total = IntCounter::with_opts(Opts::new(
            "balancer_breaker_trips_total",
            "Circuit breaker trips dropping pending work",
        ))?;
        let outstanding_lookups = IntGauge::with_opts(Opts::new(
            "balancer_outstanding_lookups",
            "Currently outstanding batch lookups",
        ))?;

        registry.register(Box::new(fetches_dispatched_total.clone()))?;
        registry.register(Box::new(fetch_failures_total.clone()))?;
        registry.register(Box::new(breaker_trips_total.clone()))?;
        registry.register(Box::new(outstanding_lookups.clone()))?;

        Ok(Self {
            fetches_dispatched_total,
            fetch_failures_total,
            breaker_trips_total,
            outstanding_lookups,
        })
    }
}

impl CacheMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let cached_players = IntGauge::with_opts(Opts::new(
            "balancer_cached_players",
            "Players with at least one cached rating record",
        ))?;
        let merges_total = IntCounter::with_opts(Opts::new(
            "balancer_cache_merges_total",
            "Rating batches merged into the cache",
        ))?;

        registry.register(Box::new(cached_players.clone()))?;
        registry.register(Box::new(merges_total.clone()))?;

        Ok(Self {
            cached_players,
            merges_total,
        })
    }
}

impl EngineMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let swaps_applied_total = IntCounter::with_opts(Opts::new(
            "balancer_swaps_applied_total",
            "Roster swaps applied",
        ))?;
        let suggestions_total = IntCounter::with_opts(Opts::new(
            "balancer_suggestions_total",
            "Swap suggestions surfaced to players",
        ))?;
        let pending_tasks = IntGauge::with_opts(Opts::new(
            "balancer_pending_tasks",
            "Deferred tasks currently queued",
        ))?;
        let replays_total = IntCounter::with_opts(Opts::new(
            "balancer_replays_total",
            "Pending-task replays triggered by fetch completions",
        ))?;

        registry.register(Box::new(swaps_applied_total.clone()))?;
        registry.register(Box::new(suggestions_total.clone()))?;
        registry.register(Box::new(pending_tasks.clone()))?;
        registry.register(Box::new(replays_total.clone()))?;

        Ok(Self {
            swaps_applied_total,
            suggestions_total,
            pending_tasks,
            replays_total,
        })
    }
}
