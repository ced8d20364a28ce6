use std::net::IpAddr;
use std::time::Duration;
use warden_dns_domain::FilterReason;

/// One completed query as the statistics sink sees it.
#[derive(Debug, Clone)]
pub struct StatsObservation {
    pub host: String,
    pub client_ip: IpAddr,
    pub reason: FilterReason,
    pub elapsed: Duration,
}

/// Port for the statistics aggregator.
///
/// The core only emits; aggregation (time buckets, top-N rollups) is an
/// external collaborator fed in parallel with the query log.
pub trait StatsSink: Send + Sync {
    fn record(&self, observation: StatsObservation);
}

/// Sink that drops everything; used when statistics are disabled.
pub struct NullStatsSink;

impl StatsSink for NullStatsSink {
    fn record(&self, _observation: StatsObservation) {}
}
