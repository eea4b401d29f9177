//! Candidate proxy sources.

use crate::error::SourceError;
use crate::proxy::{Credentials, ProxyType};
use crate::validator::Candidate;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A supplier of unvalidated proxy candidates.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch a batch of candidates.
    async fn parse(&self) -> Result<Vec<Candidate>, SourceError>;
}

/// A fixed list of candidates, returned on every call.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    candidates: Vec<Candidate>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn parse(&self) -> Result<Vec<Candidate>, SourceError> {
        Ok(self.candidates.clone())
    }
}

/// A plain-text proxy list read from a URL or a local file.
///
/// Every line is either `scheme://[user:pass@]host:port` or a bare
/// `host:port`, which gets the source's default type (or none, leaving
/// the protocol to be detected during validation).
#[derive(Debug, Clone)]
pub struct ListSource {
    location: String,
    default_kind: Option<ProxyType>,
    client: Client,
}

impl ListSource {
    pub fn new(location: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            location: location.into(),
            default_kind: None,
            client,
        }
    }

    /// Type given to bare `host:port` lines.
    pub fn with_default_kind(mut self, kind: ProxyType) -> Self {
        self.default_kind = Some(kind);
        self
    }
}

#[async_trait]
impl CandidateSource for ListSource {
    fn name(&self) -> &str {
        &self.location
    }

    async fn parse(&self) -> Result<Vec<Candidate>, SourceError> {
        let remote = self.location.starts_with("http://") || self.location.starts_with("https://");
        let content = if remote {
            self.client
                .get(&self.location)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        } else {
            tokio::fs::read_to_string(&self.location).await?
        };

        let candidates = parse_proxy_list(&content, self.default_kind);
        if candidates.is_empty() {
            return Err(SourceError::Empty(self.location.clone()));
        }
        Ok(candidates)
    }
}

/// Rotates through several sources, one per call, so no single list is hammered.
pub struct RotatingSource {
    sources: Vec<Arc<dyn CandidateSource>>,
    state: Mutex<RotationState>,
}

#[derive(Default)]
struct RotationState {
    next: usize,
    last: Option<usize>,
}

impl RotatingSource {
    pub fn new(sources: Vec<Arc<dyn CandidateSource>>) -> Self {
        Self {
            sources,
            state: Mutex::new(RotationState::default()),
        }
    }

    /// Name of the source used by the latest call, if any.
    pub fn current_name(&self) -> Option<&str> {
        let last = self.state.lock().last?;
        Some(self.sources[last].name())
    }
}

#[async_trait]
impl CandidateSource for RotatingSource {
    fn name(&self) -> &str {
        self.current_name().unwrap_or("rotating")
    }

    async fn parse(&self) -> Result<Vec<Candidate>, SourceError> {
        if self.sources.is_empty() {
            return Err(SourceError::Empty("rotating source without sources".to_string()));
        }

        let index = {
            let mut state = self.state.lock();
            let index = state.next;
            state.next = (index + 1) % self.sources.len();
            state.last = Some(index);
            index
        };
        self.sources[index].parse().await
    }
}

/// Parse the text content of a proxy list.
pub fn parse_proxy_list(content: &str, default_kind: Option<ProxyType>) -> Vec<Candidate> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| parse_proxy_line(line, default_kind))
        .collect()
}

/// Parse a single `scheme://[user:pass@]host:port` or `host:port` line.
pub fn parse_proxy_line(line: &str, default_kind: Option<ProxyType>) -> Option<Candidate> {
    if line.contains("://") {
        let url = Url::parse(line).ok()?;
        let kind = ProxyType::from_scheme(url.scheme())?;
        let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
        let port = url.port_or_known_default().filter(|port| *port > 0)?;

        let candidate = Candidate::typed(host, port, kind);
        if url.username().is_empty() {
            return Some(candidate);
        }
        let credentials = Credentials::new(url.username(), url.password().unwrap_or_default());
        return Some(candidate.with_credentials(credentials));
    }

    let (host, port) = line.rsplit_once(':')?;
    let host = host.trim();
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.strip_suffix(']')?,
        None => host,
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    let port: u16 = port.trim().parse().ok().filter(|port| *port > 0)?;

    Some(Candidate {
        kind: default_kind,
        ..Candidate::untyped(host, port)
    })
}
