//! In-memory transports and connectors shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Request, Response};
use reqwest_proxy_dispatch::{
    AttemptError, BoxError, Connector, Proxy, Transport, TransportStrategy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a mocked proxy does with requests.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Answer with this status.
    Status(u16),
    /// Fail at the transport level.
    Refuse,
}

pub fn response(status: u16) -> Response {
    http::Response::builder()
        .status(status)
        .body(String::new())
        .expect("valid status")
        .into()
}

pub fn get(url: &str) -> Request {
    Request::new(http::Method::GET, url.parse().expect("valid url"))
}

/// Tracks how many transports are running at once.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    behaviour: Behaviour,
    delay: Duration,
    gauge: Arc<Gauge>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn round_trip(&self, _request: Request) -> Result<Response, BoxError> {
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.gauge.leave();

        match self.behaviour {
            Behaviour::Status(status) => Ok(response(status)),
            Behaviour::Refuse => Err("connection refused".into()),
        }
    }
}

/// Connector whose proxies behave as scripted, keyed by `host:port` or by rule.
pub struct MockConnector {
    by_address: Mutex<HashMap<String, Behaviour>>,
    rule: Box<dyn Fn(&Proxy) -> Behaviour + Send + Sync>,
    delay: Duration,
    pub gauge: Arc<Gauge>,
    connects: Mutex<HashMap<String, usize>>,
}

impl MockConnector {
    /// Every proxy behaves the same way unless scripted otherwise.
    pub fn new(default: Behaviour) -> Self {
        Self::with_rule(move |_| default)
    }

    pub fn with_rule(rule: impl Fn(&Proxy) -> Behaviour + Send + Sync + 'static) -> Self {
        Self {
            by_address: Mutex::new(HashMap::new()),
            rule: Box::new(rule),
            delay: Duration::ZERO,
            gauge: Arc::new(Gauge::default()),
            connects: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, address: &str, behaviour: Behaviour) -> Self {
        self.by_address.lock().insert(address.to_string(), behaviour);
        self
    }

    /// Number of transports built for the proxy at `address`.
    pub fn connects(&self, address: &str) -> usize {
        self.connects.lock().get(address).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.connects.lock().values().sum()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        proxy: &Proxy,
        _timeout: Duration,
    ) -> Result<Arc<dyn Transport>, AttemptError> {
        *self.connects.lock().entry(proxy.address()).or_default() += 1;

        if TransportStrategy::for_type(proxy.kind()) == TransportStrategy::Unsupported {
            return Err(AttemptError::UnsupportedProxyType(proxy.kind()));
        }

        let behaviour = self
            .by_address
            .lock()
            .get(&proxy.address())
            .copied()
            .unwrap_or_else(|| (self.rule)(proxy));

        Ok(Arc::new(MockTransport {
            behaviour,
            delay: self.delay,
            gauge: Arc::clone(&self.gauge),
        }))
    }
}

/// Fallback transport counting its calls.
#[derive(Clone)]
pub struct CountingTransport {
    behaviour: Behaviour,
    pub calls: Arc<AtomicUsize>,
}

impl CountingTransport {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn round_trip(&self, _request: Request) -> Result<Response, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Status(status) => Ok(response(status)),
            Behaviour::Refuse => Err("fallback unreachable".into()),
        }
    }
}
