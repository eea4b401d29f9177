//! Request dispatch through the pool, with retries and fallback.

use crate::config::ProxyPoolConfig;
use crate::error::{AttemptError, DispatchError};
use crate::pool::ProxyPool;
use crate::proxy::Proxy;
use crate::transport::{Connector, ReqwestConnector, Transport};

use http::StatusCode;
use log::{debug, info, warn};
use reqwest::{Request, Response};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Executes requests through the pool's proxies.
///
/// Each request tries up to `max_retries` proxies in rotation order. Proxies
/// already judged bad are quarantined on sight without using up an attempt.
/// Once the attempts are exhausted, the request goes once through the
/// fallback transport if one is configured. A request whose body cannot be
/// replayed skips the proxies and goes straight to the fallback.
pub struct Dispatcher {
    pool: Arc<ProxyPool>,
    connector: Arc<dyn Connector>,
    max_retries: usize,
    good_codes: HashSet<StatusCode>,
    fallback: Option<Arc<dyn Transport>>,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher that builds reqwest clients for its proxies.
    pub fn new(pool: Arc<ProxyPool>, config: &ProxyPoolConfig) -> Self {
        Self::with_connector(pool, config, Arc::new(ReqwestConnector::new()))
    }

    /// Create a dispatcher reaching proxies through a custom connector.
    pub fn with_connector(
        pool: Arc<ProxyPool>,
        config: &ProxyPoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            pool,
            connector,
            max_retries: config.max_retries,
            good_codes: config.good_codes.clone(),
            fallback: config.fallback.clone(),
            request_timeout: config.request_timeout,
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Execute a request, trying proxies first and the fallback transport last.
    pub async fn dispatch(&self, request: Request) -> Result<Response, DispatchError> {
        let mut attempts = 0;
        let mut last_error: Option<AttemptError> = None;

        while attempts < self.max_retries {
            let Some(handle) = self.pool.next() else {
                debug!("No proxy available after {} attempts", attempts);
                break;
            };
            let proxy = handle.proxy();

            if handle.stats().is_bad(self.pool.min_requests()) {
                info!("Proxy {} is bad, moving to bad pool", proxy);
                self.pool.quarantine(proxy);
                continue;
            }

            let Some(attempt_request) = request.try_clone() else {
                if self.fallback.is_none() {
                    return Err(DispatchError::RequestNotCloneable);
                }
                debug!("Request body cannot be replayed, using the fallback transport");
                break;
            };
            attempts += 1;
            debug!("Using proxy {} (attempt {})", proxy, attempts);

            handle.until_ready().await;

            match self.attempt(proxy, attempt_request).await {
                Ok(response) => {
                    self.pool.record_success(proxy);
                    return Ok(response);
                }
                Err(e) => {
                    warn!("Request failed with proxy {} (attempt {}): {}", proxy, attempts, e);
                    self.pool.record_failure(proxy);
                    last_error = Some(e);
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            debug!("Proxies exhausted after {} attempts, using fallback transport", attempts);
            return fallback
                .round_trip(request)
                .await
                .map_err(|source| DispatchError::FallbackFailed {
                    attempts,
                    last: last_error,
                    source,
                });
        }

        match last_error {
            Some(source) => Err(DispatchError::AllAttemptsFailed { attempts, source }),
            None => Err(DispatchError::NoProxyAvailable),
        }
    }

    async fn attempt(&self, proxy: &Proxy, request: Request) -> Result<Response, AttemptError> {
        let transport = self.connector.connect(proxy, self.request_timeout)?;

        let response = tokio::time::timeout(self.request_timeout, transport.round_trip(request))
            .await
            .map_err(|_| AttemptError::Timeout(self.request_timeout))?
            .map_err(AttemptError::Transport)?;

        if !self.good_codes.contains(&response.status()) {
            return Err(AttemptError::BadStatus(response.status()));
        }
        Ok(response)
    }
}
