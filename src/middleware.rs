//! Middleware implementation for reqwest.

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

use anyhow::anyhow;
use async_trait::async_trait;
use log::warn;
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that sends every request through the proxy pool.
///
/// The request never reaches the rest of the middleware chain: it is executed
/// by the dispatcher, through a proxy or through the fallback transport.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    dispatcher: Arc<Dispatcher>,
}

impl ProxyPoolMiddleware {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        self.dispatcher.dispatch(req).await.map_err(|e| {
            if let DispatchError::NoProxyAvailable = e {
                let stats = self.dispatcher.pool().stats();
                warn!("No proxy available. Active: {}, Free: {}", stats.active, stats.free);
            }
            Error::Middleware(anyhow!(e))
        })
    }
}
