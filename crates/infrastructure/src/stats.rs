//! In-memory statistics sink.
//!
//! The core only increments; bucketed aggregation over time windows is an
//! external consumer's job. Counters and top-N tables live behind cheap
//! atomics and sharded maps so the hot path never blocks.

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use warden_dns_application::ports::{StatsObservation, StatsSink};
use warden_dns_domain::FilterReason;

/// Upper bounds of the processing-time histogram, microseconds.
const HISTOGRAM_BOUNDS_US: [u64; 8] = [100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000];

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    filtered: AtomicU64,
    safebrowsing: AtomicU64,
    parental: AtomicU64,
    safesearch: AtomicU64,
    whitelisted: AtomicU64,
}

/// Aggregated snapshot for the control surface.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub total: u64,
    pub filtered: u64,
    pub safebrowsing: u64,
    pub parental: u64,
    pub safesearch: u64,
    pub whitelisted: u64,
    pub histogram: Vec<(u64, u64)>,
    pub top_domains: Vec<(String, u64)>,
    pub top_blocked: Vec<(String, u64)>,
    pub top_clients: Vec<(String, u64)>,
}

pub struct InMemoryStats {
    counters: Counters,
    histogram: [AtomicU64; HISTOGRAM_BOUNDS_US.len() + 1],
    domains: DashMap<String, u64, FxBuildHasher>,
    blocked_domains: DashMap<String, u64, FxBuildHasher>,
    clients: DashMap<String, u64, FxBuildHasher>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            histogram: Default::default(),
            domains: DashMap::with_hasher(FxBuildHasher),
            blocked_domains: DashMap::with_hasher(FxBuildHasher),
            clients: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let top = |map: &DashMap<String, u64, FxBuildHasher>, n: usize| {
            let mut entries: Vec<(String, u64)> = map
                .iter()
                .map(|kv| (kv.key().clone(), *kv.value()))
                .collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            entries.truncate(n);
            entries
        };

        StatsSnapshot {
            total: self.counters.total.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            safebrowsing: self.counters.safebrowsing.load(Ordering::Relaxed),
            parental: self.counters.parental.load(Ordering::Relaxed),
            safesearch: self.counters.safesearch.load(Ordering::Relaxed),
            whitelisted: self.counters.whitelisted.load(Ordering::Relaxed),
            histogram: HISTOGRAM_BOUNDS_US
                .iter()
                .copied()
                .chain(std::iter::once(u64::MAX))
                .zip(self.histogram.iter().map(|c| c.load(Ordering::Relaxed)))
                .collect(),
            top_domains: top(&self.domains, 100),
            top_blocked: top(&self.blocked_domains, 100),
            top_clients: top(&self.clients, 100),
        }
    }
}

impl Default for InMemoryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for InMemoryStats {
    fn record(&self, observation: StatsObservation) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match observation.reason {
            FilterReason::FilteredSafeBrowsing => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                self.counters.safebrowsing.fetch_add(1, Ordering::Relaxed);
            }
            FilterReason::FilteredParental => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                self.counters.parental.fetch_add(1, Ordering::Relaxed);
            }
            FilterReason::FilteredSafeSearch => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                self.counters.safesearch.fetch_add(1, Ordering::Relaxed);
            }
            FilterReason::NotFilteredAllowed => {
                self.counters.whitelisted.fetch_add(1, Ordering::Relaxed);
            }
            reason if reason.is_filtered() => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let micros = observation.elapsed.as_micros() as u64;
        let bucket = HISTOGRAM_BOUNDS_US
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(HISTOGRAM_BOUNDS_US.len());
        self.histogram[bucket].fetch_add(1, Ordering::Relaxed);

        *self.domains.entry(observation.host.clone()).or_insert(0) += 1;
        if observation.reason.is_filtered() {
            *self.blocked_domains.entry(observation.host).or_insert(0) += 1;
        }
        *self
            .clients
            .entry(observation.client_ip.to_string())
            .or_insert(0) += 1;
    }
}
