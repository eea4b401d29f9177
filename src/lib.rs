//! # reqwest-proxy-dispatch
//!
//! A self-refreshing proxy pool dispatcher for reqwest.
//!
//! Candidates from a [`CandidateSource`] are validated concurrently (with
//! protocol detection for HTTP and SOCKS5) and kept in a three-tier
//! [`ProxyPool`]. Requests are dispatched through the pool round-robin with
//! retries; proxies that keep failing are quarantined, and a fallback
//! transport takes over once every proxy attempt failed.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod scheduler;
pub mod source;
pub mod transport;
pub mod validator;

pub use client::ProxyClient;
pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use dispatcher::Dispatcher;
pub use error::{AttemptError, BoxError, DispatchError, ProbeError, SourceError};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolStats, ProxyPool, Tier};
pub use proxy::{Credentials, Proxy, ProxyHandle, ProxyType, Stats};
pub use scheduler::{RefreshReport, Scheduler, SchedulerConfig};
pub use source::{CandidateSource, ListSource, RotatingSource, StaticSource};
pub use transport::{Connector, ReqwestConnector, Transport, TransportStrategy};
pub use validator::{Candidate, Validator, ValidatorConfig};
