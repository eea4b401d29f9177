//! Configuration for the proxy pool and its dispatcher.

use crate::proxy::DEFAULT_MIN_REQUESTS;
use crate::scheduler::MIN_INTERVAL;
use crate::transport::Transport;

use http::StatusCode;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Status codes accepted by default: 200-206 and 300-308.
pub fn default_good_codes() -> HashSet<StatusCode> {
    (200..=206)
        .chain(300..=308)
        .filter_map(|code| StatusCode::from_u16(code).ok())
        .collect()
}

fn direct_fallback() -> Option<Arc<dyn Transport>> {
    Some(Arc::new(reqwest::Client::new()))
}

/// Configuration for the proxy pool.
#[derive(Clone)]
pub struct ProxyPoolConfig {
    /// Maximum number of proxies in rotation.
    pub pool_size: usize,
    /// Number of proxies tried per request before falling back.
    pub max_retries: usize,
    /// Interval between pool refreshes.
    pub refresh_interval: Duration,
    /// Requested number of concurrent validations (capped internally).
    pub validation_workers: usize,
    /// Age after which quarantined proxies are dropped.
    pub bad_proxy_max_age: Duration,
    /// Interval between quarantine sweeps and health reassessments.
    pub maintenance_interval: Duration,
    /// Number of recorded requests before a proxy can be judged bad.
    pub min_requests: u64,
    /// Response statuses counted as a successful attempt.
    pub good_codes: HashSet<StatusCode>,
    /// Transport used once every proxy attempt failed.
    pub fallback: Option<Arc<dyn Transport>>,
    /// Timeout of a single request through a proxy.
    pub request_timeout: Duration,
    /// URL fetched through candidates during validation.
    pub health_check_url: String,
    /// Timeout of a single validation request.
    pub health_check_timeout: Duration,
    /// Timeout of the TCP reachability check.
    pub tcp_timeout: Duration,
    /// Whether candidates must accept a TCP connection before being probed.
    pub tcp_precheck: bool,
    /// Number of times each protocol is probed before giving up.
    pub probe_retries: usize,
    /// Maximum requests per second per proxy, unlimited when unset.
    pub max_requests_per_second: Option<f64>,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

impl fmt::Debug for ProxyPoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut good_codes: Vec<u16> = self.good_codes.iter().map(StatusCode::as_u16).collect();
        good_codes.sort_unstable();

        f.debug_struct("ProxyPoolConfig")
            .field("pool_size", &self.pool_size)
            .field("max_retries", &self.max_retries)
            .field("refresh_interval", &self.refresh_interval)
            .field("validation_workers", &self.validation_workers)
            .field("bad_proxy_max_age", &self.bad_proxy_max_age)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("min_requests", &self.min_requests)
            .field("good_codes", &good_codes)
            .field("fallback", &self.fallback.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("health_check_url", &self.health_check_url)
            .field("health_check_timeout", &self.health_check_timeout)
            .field("tcp_timeout", &self.tcp_timeout)
            .field("tcp_precheck", &self.tcp_precheck)
            .field("probe_retries", &self.probe_retries)
            .field("max_requests_per_second", &self.max_requests_per_second)
            .finish()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    pool_size: Option<usize>,
    max_retries: Option<usize>,
    refresh_interval: Option<Duration>,
    validation_workers: Option<usize>,
    bad_proxy_max_age: Option<Duration>,
    maintenance_interval: Option<Duration>,
    min_requests: Option<u64>,
    good_codes: Option<HashSet<StatusCode>>,
    fallback: Option<Option<Arc<dyn Transport>>>,
    request_timeout: Option<Duration>,
    health_check_url: Option<String>,
    health_check_timeout: Option<Duration>,
    tcp_timeout: Option<Duration>,
    tcp_precheck: Option<bool>,
    probe_retries: Option<usize>,
    max_requests_per_second: Option<f64>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            pool_size: None,
            max_retries: None,
            refresh_interval: None,
            validation_workers: None,
            bad_proxy_max_age: None,
            maintenance_interval: None,
            min_requests: None,
            good_codes: None,
            fallback: None,
            request_timeout: None,
            health_check_url: None,
            health_check_timeout: None,
            tcp_timeout: None,
            tcp_precheck: None,
            probe_retries: None,
            max_requests_per_second: None,
        }
    }

    /// Set the maximum number of proxies in rotation.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set the number of proxies tried per request before falling back.
    pub fn max_retries(mut self, count: usize) -> Self {
        self.max_retries = Some(count);
        self
    }

    /// Set the interval between pool refreshes. Values under 10ms are raised to 10ms.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the requested number of concurrent validations.
    pub fn validation_workers(mut self, workers: usize) -> Self {
        self.validation_workers = Some(workers);
        self
    }

    /// Set the age after which quarantined proxies are dropped.
    pub fn bad_proxy_max_age(mut self, age: Duration) -> Self {
        self.bad_proxy_max_age = Some(age);
        self
    }

    /// Set the interval between quarantine sweeps. Values under 10ms are raised to 10ms.
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    /// Set the number of recorded requests before a proxy can be judged bad.
    pub fn min_requests(mut self, count: u64) -> Self {
        self.min_requests = Some(count);
        self
    }

    /// Set the response statuses counted as success. Unknown codes are ignored.
    pub fn good_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.good_codes = Some(
            codes
                .into_iter()
                .filter_map(|code| StatusCode::from_u16(code).ok())
                .collect(),
        );
        self
    }

    /// Set the transport used once every proxy attempt failed.
    pub fn fallback(mut self, transport: impl Transport + 'static) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        self.fallback = Some(Some(transport));
        self
    }

    /// Fail requests instead of falling back once every proxy attempt failed.
    pub fn no_fallback(mut self) -> Self {
        self.fallback = Some(None);
        self
    }

    /// Set the timeout of a single request through a proxy.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the URL used for validation.
    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set the timeout for validation requests.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    /// Set the timeout of the TCP reachability check.
    pub fn tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = Some(timeout);
        self
    }

    /// Enable or disable the TCP reachability check.
    pub fn tcp_precheck(mut self, enabled: bool) -> Self {
        self.tcp_precheck = Some(enabled);
        self
    }

    /// Set the number of times each protocol is probed.
    pub fn probe_retries(mut self, count: usize) -> Self {
        self.probe_retries = Some(count);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            pool_size: self.pool_size.unwrap_or(50),
            max_retries: self.max_retries.unwrap_or(3),
            refresh_interval: self
                .refresh_interval
                .unwrap_or(Duration::from_secs(10))
                .max(MIN_INTERVAL),
            validation_workers: self.validation_workers.unwrap_or(30),
            bad_proxy_max_age: self.bad_proxy_max_age.unwrap_or(Duration::from_secs(24 * 3600)),
            maintenance_interval: self
                .maintenance_interval
                .unwrap_or(Duration::from_secs(3600))
                .max(MIN_INTERVAL),
            min_requests: self.min_requests.unwrap_or(DEFAULT_MIN_REQUESTS),
            good_codes: self.good_codes.unwrap_or_else(default_good_codes),
            fallback: self.fallback.unwrap_or_else(direct_fallback),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
            health_check_url: self
                .health_check_url
                .unwrap_or_else(|| "https://www.google.com".to_string()),
            health_check_timeout: self.health_check_timeout.unwrap_or(Duration::from_secs(10)),
            tcp_timeout: self.tcp_timeout.unwrap_or(Duration::from_secs(5)),
            tcp_precheck: self.tcp_precheck.unwrap_or(true),
            probe_retries: self.probe_retries.unwrap_or(2),
            max_requests_per_second: self.max_requests_per_second,
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
