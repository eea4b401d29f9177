//! Transports used to reach targets, directly or through a proxy.

use crate::error::{AttemptError, BoxError};
use crate::proxy::{Proxy, ProxyType};

use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;
use std::time::Duration;

/// Something that can execute an HTTP request and return its response.
///
/// `reqwest::Client` implements this directly, which makes any configured
/// client usable as a fallback transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request) -> Result<Response, BoxError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn round_trip(&self, request: Request) -> Result<Response, BoxError> {
        self.execute(request).await.map_err(Into::into)
    }
}

/// Builds a transport that routes through a given proxy.
pub trait Connector: Send + Sync {
    fn connect(&self, proxy: &Proxy, timeout: Duration) -> Result<Arc<dyn Transport>, AttemptError>;
}

/// How a transport is built for a given proxy type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStrategy {
    /// Plain HTTP forward proxy, tunnelling https targets with CONNECT.
    ForwardProxy,
    /// SOCKS5 dial, authenticated when the proxy carries credentials.
    Socks5,
    /// No transport exists for this proxy type.
    Unsupported,
}

impl TransportStrategy {
    pub fn for_type(kind: ProxyType) -> Self {
        match kind {
            ProxyType::Http => TransportStrategy::ForwardProxy,
            ProxyType::Socks5 => TransportStrategy::Socks5,
            ProxyType::Socks4 => TransportStrategy::Unsupported,
        }
    }
}

/// Default connector: one `reqwest::Client` per proxy.
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnector {
    user_agent: Option<String>,
}

impl ReqwestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the User-Agent sent on every request through built clients.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn to_reqwest_proxy(&self, proxy: &Proxy) -> Result<reqwest::Proxy, AttemptError> {
        let invalid = |e: url::ParseError| AttemptError::Transport(Box::new(e));

        match TransportStrategy::for_type(proxy.kind()) {
            TransportStrategy::ForwardProxy => {
                let mut reqwest_proxy = reqwest::Proxy::all(proxy.url().map_err(invalid)?)
                    .map_err(|e| AttemptError::Transport(Box::new(e)))?;
                if let Some(credentials) = proxy.credentials() {
                    reqwest_proxy =
                        reqwest_proxy.basic_auth(&credentials.username, &credentials.password);
                }
                Ok(reqwest_proxy)
            }
            TransportStrategy::Socks5 => {
                reqwest::Proxy::all(proxy.url_with_credentials().map_err(invalid)?)
                    .map_err(|e| AttemptError::Transport(Box::new(e)))
            }
            TransportStrategy::Unsupported => Err(AttemptError::UnsupportedProxyType(proxy.kind())),
        }
    }
}

impl Connector for ReqwestConnector {
    fn connect(
        &self,
        proxy: &Proxy,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, AttemptError> {
        let reqwest_proxy = self.to_reqwest_proxy(proxy)?;

        let mut builder = reqwest::Client::builder()
            .proxy(reqwest_proxy)
            .timeout(timeout)
            .connect_timeout(timeout);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }

        let client = builder
            .build()
            .map_err(|e| AttemptError::Transport(Box::new(e)))?;
        Ok(Arc::new(client))
    }
}
