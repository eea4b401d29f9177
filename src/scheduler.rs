//! Background refresh and maintenance of the pool.

use crate::config::ProxyPoolConfig;
use crate::pool::ProxyPool;
use crate::source::CandidateSource;
use crate::validator::Validator;

use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Capacity of the channel between validation and the pool.
const VALIDATED_BUFFER: usize = 100;

/// Shortest period either background loop ticks at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Timing and sizing of the background loops.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub refresh_interval: Duration,
    pub maintenance_interval: Duration,
    pub validation_workers: usize,
    pub bad_proxy_max_age: Duration,
    pub min_requests: u64,
}

impl From<&ProxyPoolConfig> for SchedulerConfig {
    fn from(config: &ProxyPoolConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval,
            maintenance_interval: config.maintenance_interval,
            validation_workers: config.validation_workers,
            bad_proxy_max_age: config.bad_proxy_max_age,
            min_requests: config.min_requests,
        }
    }
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Candidates returned by the source.
    pub found: usize,
    /// Candidates accepted by the validator.
    pub validated: usize,
    /// Accepted proxies that were new to the pool.
    pub added: usize,
}

/// Pull candidates from `source`, validate them and add the survivors to `pool`.
pub async fn refresh_pool(
    pool: &ProxyPool,
    validator: &Validator,
    source: &dyn CandidateSource,
    workers: usize,
) -> RefreshReport {
    let candidates = match source.parse().await {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Failed to fetch proxies from {}: {}", source.name(), e);
            return RefreshReport::default();
        }
    };

    let mut report = RefreshReport {
        found: candidates.len(),
        ..RefreshReport::default()
    };
    if candidates.is_empty() {
        info!("No proxies found from {}", source.name());
        return report;
    }
    info!("Found {} proxies from {}, starting validation", report.found, source.name());

    let (tx, mut rx) = mpsc::channel(VALIDATED_BUFFER);
    let validation = validator.validate_stream(candidates, workers, tx);
    let collect = async {
        let mut added = 0;
        while let Some(proxy) = rx.recv().await {
            if pool.add(proxy) {
                added += 1;
            }
        }
        added
    };
    let (validated, added) = tokio::join!(validation, collect);
    report.validated = validated;
    report.added = added;

    let stats = pool.stats();
    info!(
        "Added {} new proxies from {} (validated {} of {} found), pool: {} active, {} free",
        report.added, source.name(), report.validated, report.found, stats.active, stats.free
    );
    report
}

/// Handle on the background loops.
///
/// Dropping the handle also stops the loops, but without waiting for them;
/// use [`shutdown`](Scheduler::shutdown) to be sure they are gone.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the refresh and maintenance loops on the current tokio runtime.
    pub fn start(
        pool: Arc<ProxyPool>,
        validator: Arc<Validator>,
        source: Arc<dyn CandidateSource>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        let refresh = tokio::spawn(refresh_loop(
            Arc::clone(&pool),
            validator,
            source,
            config.clone(),
            shutdown.subscribe(),
        ));
        let maintenance = tokio::spawn(maintenance_loop(pool, config, shutdown.subscribe()));

        Self {
            shutdown,
            tasks: Mutex::new(vec![refresh, maintenance]),
        }
    }

    /// Stop both loops and wait for them to exit.
    ///
    /// Once this returns, the loops no longer touch the pool. Later calls return at once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// `interval` panics on a zero period, so short periods are raised to [`MIN_INTERVAL`].
fn tick_period(name: &str, period: Duration) -> Duration {
    if period < MIN_INTERVAL {
        warn!("{} interval {:?} is too short, using {:?}", name, period, MIN_INTERVAL);
        return MIN_INTERVAL;
    }
    period
}

async fn refresh_loop(
    pool: Arc<ProxyPool>,
    validator: Arc<Validator>,
    source: Arc<dyn CandidateSource>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(tick_period("refresh", config.refresh_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        if !first && pool.deficit() == 0 && pool.free_size() > 0 {
            continue;
        }
        first = false;

        tokio::select! {
            _ = refresh_pool(&pool, &validator, source.as_ref(), config.validation_workers) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn maintenance_loop(
    pool: Arc<ProxyPool>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = tick_period("maintenance", config.maintenance_interval);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pool.sweep_bad(config.bad_proxy_max_age);
                pool.reassess_bad(config.min_requests);
            }
            _ = shutdown.changed() => return,
        }
    }
}
