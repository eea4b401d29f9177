//! Proxy representation and health statistics.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Failure rate above which a sufficiently sampled proxy is considered bad.
pub const BAD_FAILURE_RATE: f64 = 0.7;

/// Default number of recorded requests before a proxy can be judged bad.
pub const DEFAULT_MIN_REQUESTS: u64 = 10;

/// Rate limiter attached to a single proxy.
pub type ProxyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Join a host and a port into `host:port`, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyType {
    /// HTTP forward proxy (CONNECT for https targets).
    Http,
    /// SOCKS4. Representable, but no transport can be built for it.
    Socks4,
    /// SOCKS5, with optional username/password authentication.
    Socks5,
}

impl ProxyType {
    /// URL scheme used when talking to a proxy of this type.
    ///
    /// SOCKS5 uses `socks5h` so that target host names are resolved by the proxy.
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5h",
        }
    }

    /// Parse a URL scheme into a proxy type.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(ProxyType::Http),
            "socks4" | "socks4a" => Some(ProxyType::Socks4),
            "socks5" | "socks5h" => Some(ProxyType::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "HTTP"),
            ProxyType::Socks4 => write!(f, "SOCKS4"),
            ProxyType::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

/// Username/password pair presented to a proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Representation of a proxy server.
///
/// A proxy is identified by its `host:port` address; the protocol and the
/// credentials are not part of its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    host: String,
    port: u16,
    kind: ProxyType,
    credentials: Option<Credentials>,
}

impl Proxy {
    /// Create a new proxy without credentials.
    pub fn new(host: impl Into<String>, port: u16, kind: ProxyType) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
            credentials: None,
        }
    }

    /// Attach credentials to this proxy.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Re-tag the proxy with another protocol, keeping host, port and credentials.
    pub fn with_kind(mut self, kind: ProxyType) -> Self {
        self.kind = kind;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> ProxyType {
        self.kind
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Identity key of the proxy: `host:port`, or `[host]:port` for IPv6.
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// Proxy URL without credentials, e.g. `socks5h://127.0.0.1:1080`.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}://{}", self.kind.scheme(), self.address()))
    }

    /// Proxy URL with the credentials embedded as user info.
    pub fn url_with_credentials(&self) -> Result<Url, url::ParseError> {
        let mut url = self.url()?;
        if let Some(credentials) = &self.credentials {
            // Only fails for cannot-be-a-base URLs, which a host:port URL never is.
            let _ = url.set_username(&credentials.username);
            let _ = url.set_password(Some(&credentials.password));
        }
        Ok(url)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), self.address())
    }
}

/// Running request statistics of a proxy.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Number of requests made through this proxy.
    pub total: u64,
    /// Number of successful requests.
    pub successes: u64,
    /// Number of failed requests.
    pub failures: u64,
    /// When the proxy entered the pool.
    pub first_used: Instant,
    /// When a request through this proxy last completed.
    pub last_used: Option<Instant>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            first_used: Instant::now(),
            last_used: None,
        }
    }

    pub fn record_success(&mut self) {
        self.total += 1;
        self.successes += 1;
        self.last_used = Some(Instant::now());
    }

    pub fn record_failure(&mut self) {
        self.total += 1;
        self.failures += 1;
        self.last_used = Some(Instant::now());
    }

    /// Fraction of successful requests, 0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total as f64
    }

    /// Fraction of failed requests, 1 when nothing was recorded.
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.failures as f64 / self.total as f64
    }

    /// Whether the proxy should be quarantined.
    ///
    /// A proxy with fewer than `min_requests` recorded requests is never bad.
    pub fn is_bad(&self, min_requests: u64) -> bool {
        if self.total < min_requests {
            return false;
        }
        self.failure_rate() > BAD_FAILURE_RATE
    }

    /// Time elapsed since last use, or since the proxy entered the pool.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used.unwrap_or(self.first_used))
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// A proxy together with its statistics, as stored by the pool.
#[derive(Debug)]
pub(crate) struct ProxyRecord {
    pub(crate) proxy: Arc<Proxy>,
    pub(crate) stats: Stats,
    pub(crate) limiter: Option<Arc<ProxyLimiter>>,
}

impl ProxyRecord {
    pub(crate) fn new(proxy: Proxy, max_rps: Option<f64>) -> Self {
        let limiter = max_rps.map(|rps| {
            let per_second = NonZeroU32::new(rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
            Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
        });

        Self {
            proxy: Arc::new(proxy),
            stats: Stats::new(),
            limiter,
        }
    }

    pub(crate) fn handle(&self) -> ProxyHandle {
        ProxyHandle {
            proxy: Arc::clone(&self.proxy),
            stats: self.stats,
            limiter: self.limiter.clone(),
        }
    }
}

/// Snapshot of a pooled proxy handed out by [`ProxyPool::next`](crate::ProxyPool::next).
///
/// The pool keeps ownership of the record; outcomes are reported back by
/// address through `record_success` / `record_failure`.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    proxy: Arc<Proxy>,
    stats: Stats,
    limiter: Option<Arc<ProxyLimiter>>,
}

impl ProxyHandle {
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Statistics at the time the handle was taken.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Wait until the proxy's rate limit allows another request.
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}
