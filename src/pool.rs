//! Core proxy pool implementation.
//!
//! The pool keeps validated proxies in three disjoint tiers:
//!
//! * **active**: at most `max_size` proxies, handed out round-robin by [`ProxyPool::next`];
//! * **free**: validated overflow waiting for room in the active tier, first in first out;
//! * **bad**: quarantined proxies, never handed out again and purged by age.

use crate::proxy::{Proxy, ProxyHandle, ProxyRecord, DEFAULT_MIN_REQUESTS};

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Tier a proxy currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Active,
    Free,
    Bad,
}

/// Gauges describing the current state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of proxies in rotation.
    pub active: usize,
    /// Number of validated proxies waiting for room in the rotation.
    pub free: usize,
    /// Number of quarantined proxies.
    pub bad: usize,
    /// How many proxies the rotation is missing to be full.
    pub deficit: usize,
}

#[derive(Debug, Default)]
struct Tiers {
    active: Vec<ProxyRecord>,
    free: VecDeque<ProxyRecord>,
    bad: HashMap<String, ProxyRecord>,
    /// Addresses of every active and free record.
    live: HashSet<String>,
    cursor: usize,
}

impl Tiers {
    fn contains(&self, address: &str) -> bool {
        self.live.contains(address) || self.bad.contains_key(address)
    }

    fn position(&self, address: &str) -> Option<usize> {
        self.active.iter().position(|r| r.proxy.address() == address)
    }

    fn take_active(&mut self, index: usize) -> ProxyRecord {
        let record = self.active.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.active.len() {
            self.cursor = 0;
        }
        record
    }

    fn refill(&mut self, max_size: usize) -> usize {
        let mut moved = 0;
        while self.active.len() < max_size {
            match self.free.pop_front() {
                Some(record) => {
                    self.active.push(record);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    fn promote_one(&mut self, max_size: usize) {
        if self.active.len() < max_size {
            if let Some(record) = self.free.pop_front() {
                self.active.push(record);
            }
        }
    }

    fn find_mut(&mut self, address: &str) -> Option<&mut ProxyRecord> {
        if let Some(index) = self.position(address) {
            return self.active.get_mut(index);
        }
        if let Some(record) = self.free.iter_mut().find(|r| r.proxy.address() == address) {
            return Some(record);
        }
        self.bad.get_mut(address)
    }
}

/// A pool of validated proxies with health-based eviction.
///
/// Every operation, including [`next`](ProxyPool::next) which advances the
/// rotation cursor, takes the write lock; only the gauges take the read lock.
#[derive(Debug)]
pub struct ProxyPool {
    tiers: RwLock<Tiers>,
    max_size: usize,
    min_requests: u64,
    max_requests_per_second: Option<f64>,
}

impl ProxyPool {
    /// Create an empty pool whose active tier holds at most `max_size` proxies.
    pub fn new(max_size: usize) -> Self {
        Self {
            tiers: RwLock::new(Tiers::default()),
            max_size,
            min_requests: DEFAULT_MIN_REQUESTS,
            max_requests_per_second: None,
        }
    }

    /// Set the number of recorded requests before a proxy can be judged bad.
    pub fn with_min_requests(mut self, min_requests: u64) -> Self {
        self.min_requests = min_requests;
        self
    }

    /// Attach a rate limiter of `rps` requests per second to every proxy added from now on.
    pub fn with_max_requests_per_second(mut self, rps: Option<f64>) -> Self {
        self.max_requests_per_second = rps;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_requests(&self) -> u64 {
        self.min_requests
    }

    /// Add a validated proxy.
    ///
    /// Returns `false` when a proxy with the same address is already in any tier.
    pub fn add(&self, proxy: Proxy) -> bool {
        let address = proxy.address();
        let mut tiers = self.tiers.write();

        if tiers.contains(&address) {
            return false;
        }

        let record = ProxyRecord::new(proxy, self.max_requests_per_second);
        tiers.live.insert(address);
        if tiers.active.len() < self.max_size {
            tiers.active.push(record);
        } else {
            tiers.free.push_back(record);
        }
        true
    }

    /// Get the next proxy in rotation.
    ///
    /// Tops the active tier up from the free tier first; returns `None` when
    /// both are empty.
    pub fn next(&self) -> Option<ProxyHandle> {
        let mut tiers = self.tiers.write();

        tiers.refill(self.max_size);
        if tiers.active.is_empty() {
            return None;
        }
        if tiers.cursor >= tiers.active.len() {
            tiers.cursor = 0;
        }

        let handle = tiers.active[tiers.cursor].handle();
        tiers.cursor = (tiers.cursor + 1) % tiers.active.len();
        Some(handle)
    }

    /// Remove a proxy from the rotation, promoting one free proxy if room opened.
    pub fn remove(&self, proxy: &Proxy) -> bool {
        let address = proxy.address();
        let mut tiers = self.tiers.write();

        let removed = match tiers.position(&address) {
            Some(index) => {
                tiers.take_active(index);
                tiers.live.remove(&address);
                true
            }
            None => false,
        };

        if removed {
            tiers.promote_one(self.max_size);
        }
        removed
    }

    /// Move a proxy from the rotation into quarantine, promoting one free proxy if room opened.
    pub fn quarantine(&self, proxy: &Proxy) -> bool {
        let address = proxy.address();
        let mut tiers = self.tiers.write();

        let Some(index) = tiers.position(&address) else {
            return false;
        };

        let record = tiers.take_active(index);
        warn!(
            "Proxy {} quarantined: {} failures out of {} requests",
            record.proxy, record.stats.failures, record.stats.total
        );
        tiers.live.remove(&address);
        tiers.bad.insert(address, record);

        tiers.promote_one(self.max_size);
        true
    }

    /// Drop quarantined proxies unused for longer than `max_age`.
    ///
    /// Returns how many proxies were dropped.
    pub fn sweep_bad(&self, max_age: Duration) -> usize {
        self.sweep_bad_at(max_age, Instant::now())
    }

    pub(crate) fn sweep_bad_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut tiers = self.tiers.write();
        let before = tiers.bad.len();
        tiers.bad.retain(|_, record| record.stats.age(now) <= max_age);
        let dropped = before - tiers.bad.len();

        if dropped > 0 {
            info!("Dropped {} quarantined proxies older than {:?}", dropped, max_age);
        }
        dropped
    }

    /// Quarantine every active proxy that is now judged bad, then refill from the free tier.
    ///
    /// Returns how many proxies were quarantined.
    pub fn reassess_bad(&self, min_requests: u64) -> usize {
        let mut tiers = self.tiers.write();
        let mut quarantined = 0;

        for index in (0..tiers.active.len()).rev() {
            if tiers.active[index].stats.is_bad(min_requests) {
                let record = tiers.take_active(index);
                let address = record.proxy.address();
                debug!(
                    "Proxy {} is bad: failure rate {:.2} over {} requests",
                    record.proxy,
                    record.stats.failure_rate(),
                    record.stats.total
                );
                tiers.live.remove(&address);
                tiers.bad.insert(address, record);
                quarantined += 1;
            }
        }

        let promoted = tiers.refill(self.max_size);
        if quarantined > 0 {
            info!(
                "Health sweep quarantined {} proxies, promoted {} from free pool",
                quarantined, promoted
            );
        }
        quarantined
    }

    /// Report a successful request through `proxy`.
    pub fn record_success(&self, proxy: &Proxy) {
        if let Some(record) = self.tiers.write().find_mut(&proxy.address()) {
            record.stats.record_success();
        }
    }

    /// Report a failed request through `proxy`.
    pub fn record_failure(&self, proxy: &Proxy) {
        if let Some(record) = self.tiers.write().find_mut(&proxy.address()) {
            record.stats.record_failure();
        }
    }

    /// Tier the proxy with the given `host:port` address lives in, if any.
    pub fn tier_of(&self, address: &str) -> Option<Tier> {
        let tiers = self.tiers.read();
        if tiers.bad.contains_key(address) {
            Some(Tier::Bad)
        } else if tiers.position(address).is_some() {
            Some(Tier::Active)
        } else if tiers.live.contains(address) {
            Some(Tier::Free)
        } else {
            None
        }
    }

    /// Addresses of the active tier in rotation order.
    pub fn active_addresses(&self) -> Vec<String> {
        self.tiers.read().active.iter().map(|r| r.proxy.address()).collect()
    }

    /// Number of proxies in rotation.
    pub fn size(&self) -> usize {
        self.tiers.read().active.len()
    }

    /// Number of validated proxies waiting for room in the rotation.
    pub fn free_size(&self) -> usize {
        self.tiers.read().free.len()
    }

    /// Number of quarantined proxies.
    pub fn bad_size(&self) -> usize {
        self.tiers.read().bad.len()
    }

    /// How many proxies the rotation is missing to be full.
    pub fn deficit(&self) -> usize {
        self.max_size.saturating_sub(self.size())
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let tiers = self.tiers.read();
        PoolStats {
            active: tiers.active.len(),
            free: tiers.free.len(),
            bad: tiers.bad.len(),
            deficit: self.max_size.saturating_sub(tiers.active.len()),
        }
    }
}
