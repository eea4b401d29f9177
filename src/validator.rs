//! Candidate proxy validation and protocol detection.

use crate::config::ProxyPoolConfig;
use crate::error::{AttemptError, ProbeError};
use crate::proxy::{join_host_port, Credentials, Proxy, ProxyType};
use crate::transport::{Connector, ReqwestConnector};

use futures::stream::{self, StreamExt};
use http::header::{HeaderValue, USER_AGENT};
use http::{Method, StatusCode};
use log::{debug, info};
use reqwest::Request;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

/// Hard upper bound on concurrent validations, whatever the caller asks for.
pub const MAX_VALIDATION_WORKERS: usize = 50;

/// Concurrency used when the caller asks for none.
pub const DEFAULT_VALIDATION_WORKERS: usize = 10;

/// Order in which protocols are tried on a candidate of unknown type.
pub const DETECTION_ORDER: [ProxyType; 3] = [ProxyType::Http, ProxyType::Socks5, ProxyType::Socks4];

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// An unvalidated proxy endpoint, possibly of unknown protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    /// Protocol announced by the source, `None` when it must be detected.
    pub kind: Option<ProxyType>,
    pub credentials: Option<Credentials>,
}

impl Candidate {
    /// A candidate whose protocol must be detected.
    pub fn untyped(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            kind: None,
            credentials: None,
        }
    }

    /// A candidate whose protocol is known; only that protocol is probed.
    pub fn typed(host: impl Into<String>, port: u16, kind: ProxyType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::untyped(host, port)
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// The proxy this candidate would be if it speaks `kind`.
    pub fn as_proxy(&self, kind: ProxyType) -> Proxy {
        let proxy = Proxy::new(self.host.clone(), self.port, kind);
        match &self.credentials {
            Some(credentials) => proxy.with_credentials(credentials.clone()),
            None => proxy,
        }
    }
}

impl From<Proxy> for Candidate {
    fn from(proxy: Proxy) -> Self {
        Self {
            host: proxy.host().to_string(),
            port: proxy.port(),
            kind: Some(proxy.kind()),
            credentials: proxy.credentials().cloned(),
        }
    }
}

/// Configuration for the validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// URL fetched through each candidate; a 200 answer accepts it.
    pub test_url: String,
    /// Timeout of a single test request.
    pub timeout: Duration,
    /// Timeout of the TCP reachability check.
    pub tcp_timeout: Duration,
    /// Whether to check TCP reachability before probing protocols.
    pub tcp_precheck: bool,
    /// Attempts per protocol.
    pub retries: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            test_url: "https://www.google.com".to_string(),
            timeout: Duration::from_secs(10),
            tcp_timeout: Duration::from_secs(5),
            tcp_precheck: true,
            retries: 2,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_url(mut self, url: impl Into<String>) -> Self {
        self.test_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = timeout;
        self
    }

    pub fn with_tcp_precheck(mut self, enabled: bool) -> Self {
        self.tcp_precheck = enabled;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }
}

impl From<&ProxyPoolConfig> for ValidatorConfig {
    fn from(config: &ProxyPoolConfig) -> Self {
        Self {
            test_url: config.health_check_url.clone(),
            timeout: config.health_check_timeout,
            tcp_timeout: config.tcp_timeout,
            tcp_precheck: config.tcp_precheck,
            retries: config.probe_retries,
        }
    }
}

/// Probes candidate proxies against a live test URL.
pub struct Validator {
    config: ValidatorConfig,
    connector: Arc<dyn Connector>,
}

impl Validator {
    /// Create a validator that builds reqwest clients for its probes.
    pub fn new(config: ValidatorConfig) -> Self {
        let connector = ReqwestConnector::new().with_user_agent(PROBE_USER_AGENT);
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a validator probing through a custom connector.
    pub fn with_connector(config: ValidatorConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Whether the candidate works as a proxy.
    pub async fn probe(&self, candidate: &Candidate) -> bool {
        self.probe_and_detect(candidate).await.is_some()
    }

    /// Probe the candidate and return it tagged with the protocol it speaks.
    ///
    /// A typed candidate is only probed with its own protocol; an untyped one
    /// is tried with each of [`DETECTION_ORDER`] until one succeeds.
    pub async fn probe_and_detect(&self, candidate: &Candidate) -> Option<Proxy> {
        if self.config.tcp_precheck {
            if let Err(e) = self.check_tcp(candidate).await {
                debug!("Candidate {} rejected: {}", candidate.address(), e);
                return None;
            }
        }

        let kinds: &[ProxyType] = match &candidate.kind {
            Some(kind) => std::slice::from_ref(kind),
            None => &DETECTION_ORDER,
        };

        for &kind in kinds {
            let proxy = candidate.as_proxy(kind);
            match self.probe_protocol(&proxy).await {
                Ok(()) => {
                    debug!("Candidate {} accepted as {}", candidate.address(), kind);
                    return Some(proxy);
                }
                Err(e) => debug!("Candidate {} failed {} probe: {}", candidate.address(), kind, e),
            }
        }
        None
    }

    /// Validate candidates concurrently, sending accepted proxies to `out`.
    ///
    /// At most `concurrency` candidates (0 meaning the default, and never more
    /// than [`MAX_VALIDATION_WORKERS`]) are probed at a time. Returns once every
    /// candidate is processed, dropping `out`. Returns the number of accepted proxies.
    pub async fn validate_stream(
        &self,
        candidates: Vec<Candidate>,
        concurrency: usize,
        out: mpsc::Sender<Proxy>,
    ) -> usize {
        let workers = effective_workers(concurrency);
        let total = candidates.len();
        info!("Validating {} candidates with {} workers", total, workers);

        let accepted = AtomicUsize::new(0);
        stream::iter(candidates)
            .for_each_concurrent(workers, |candidate| {
                let (out, accepted) = (&out, &accepted);
                async move {
                    let Some(proxy) = self.probe_and_detect(&candidate).await else {
                        return;
                    };
                    if out.send(proxy).await.is_err() {
                        debug!("Validation output closed, dropping {}", candidate.address());
                        return;
                    }
                    accepted.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;
        let accepted = accepted.into_inner();

        info!("Validation finished: {}/{} candidates accepted", accepted, total);
        accepted
    }

    async fn check_tcp(&self, candidate: &Candidate) -> Result<(), ProbeError> {
        let address = candidate.address();
        match timeout(self.config.tcp_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(ProbeError::Unreachable { address, source }),
            Err(_) => Err(ProbeError::Timeout(self.config.tcp_timeout)),
        }
    }

    async fn probe_protocol(&self, proxy: &Proxy) -> Result<(), ProbeError> {
        let attempts = self.config.retries.max(1);
        let mut last = None;

        for _ in 0..attempts {
            match self.test_once(proxy).await {
                Ok(()) => return Ok(()),
                // Retrying cannot fix an unsupported protocol or a bad URL.
                Err(e @ ProbeError::Attempt(AttemptError::UnsupportedProxyType(_)))
                | Err(e @ ProbeError::InvalidUrl(_)) => return Err(e),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or(ProbeError::Timeout(self.config.timeout)))
    }

    async fn test_once(&self, proxy: &Proxy) -> Result<(), ProbeError> {
        let transport = self.connector.connect(proxy, self.config.timeout)?;

        let url = Url::parse(&self.config.test_url)?;
        let mut request = Request::new(Method::GET, url);
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(PROBE_USER_AGENT));

        let response = timeout(self.config.timeout, transport.round_trip(request))
            .await
            .map_err(|_| ProbeError::Timeout(self.config.timeout))?
            .map_err(AttemptError::Transport)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeError::BadStatus(status)),
        }
    }
}

/// Number of concurrent validations actually used for a requested concurrency.
pub fn effective_workers(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_VALIDATION_WORKERS,
        n => n.min(MAX_VALIDATION_WORKERS),
    }
}
