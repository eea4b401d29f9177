//! Self-refreshing proxy client.

use crate::config::ProxyPoolConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::middleware::ProxyPoolMiddleware;
use crate::pool::{PoolStats, ProxyPool};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::source::CandidateSource;
use crate::transport::{Connector, ReqwestConnector};
use crate::validator::{Validator, ValidatorConfig};

use log::info;
use reqwest::{Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A proxy pool kept filled from a candidate source, with a dispatcher on top.
///
/// Construction spawns the background loops, so it must happen inside a
/// tokio runtime. Call [`close`](ProxyClient::close) to stop them.
pub struct ProxyClient {
    pool: Arc<ProxyPool>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
    closed: AtomicBool,
}

impl ProxyClient {
    /// Create a client reaching proxies with reqwest.
    pub fn new(config: ProxyPoolConfig, source: Arc<dyn CandidateSource>) -> Self {
        let validator = Validator::new(ValidatorConfig::from(&config));
        Self::build(config, source, validator, Arc::new(ReqwestConnector::new()))
    }

    /// Create a client that probes and dispatches through a custom connector.
    pub fn with_connector(
        config: ProxyPoolConfig,
        source: Arc<dyn CandidateSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let validator =
            Validator::with_connector(ValidatorConfig::from(&config), Arc::clone(&connector));
        Self::build(config, source, validator, connector)
    }

    fn build(
        config: ProxyPoolConfig,
        source: Arc<dyn CandidateSource>,
        validator: Validator,
        connector: Arc<dyn Connector>,
    ) -> Self {
        info!("Starting proxy pool: {:?}", config);

        let pool = Arc::new(
            ProxyPool::new(config.pool_size)
                .with_min_requests(config.min_requests)
                .with_max_requests_per_second(config.max_requests_per_second),
        );
        let dispatcher = Arc::new(Dispatcher::with_connector(
            Arc::clone(&pool),
            &config,
            connector,
        ));
        let scheduler = Scheduler::start(
            Arc::clone(&pool),
            Arc::new(validator),
            source,
            SchedulerConfig::from(&config),
        );

        Self {
            pool,
            dispatcher,
            scheduler,
            closed: AtomicBool::new(false),
        }
    }

    /// Execute a request through the pool.
    pub async fn execute(&self, request: Request) -> Result<Response, DispatchError> {
        self.dispatcher.dispatch(request).await
    }

    /// Middleware routing a `reqwest_middleware` client through this pool.
    pub fn middleware(&self) -> ProxyPoolMiddleware {
        ProxyPoolMiddleware::new(Arc::clone(&self.dispatcher))
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop the background loops and wait for them to exit.
    ///
    /// Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown().await;

        let stats = self.pool.stats();
        info!(
            "Proxy pool closed with {} active, {} free, {} bad proxies",
            stats.active, stats.free, stats.bad
        );
    }
}
