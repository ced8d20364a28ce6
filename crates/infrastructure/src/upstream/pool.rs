use super::bootstrap::BootstrapResolver;
use super::spec::{UpstreamScheme, UpstreamSpec};
use super::transport::{tcp::TcpTransport, DnsTransport, Transport};
use crate::dns_wire;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::select_ok;
use lru::LruCache;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_dns_application::ports::{UpstreamAnswer, UpstreamExchanger};
use warden_dns_domain::{DnsConfig, UpstreamMode, WardenError};

/// An endpoint that failed stays demoted for this long.
const FAILURE_WINDOW: Duration = Duration::from_secs(30);

/// Connect timeout for fastest-addr probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_PORT: u16 = 80;

struct PoolEndpoint {
    spec: UpstreamSpec,
    display: Arc<str>,
    transport: Transport,
    /// UDP endpoints retry truncated answers over TCP.
    tcp_fallback: Option<TcpTransport>,
    failures: AtomicU32,
    /// Millis since pool start of the last failure; 0 = never failed.
    last_failure_ms: AtomicU64,
}

impl PoolEndpoint {
    fn demoted(&self, epoch: Instant) -> bool {
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        if last == 0 || self.failures.load(Ordering::Relaxed) == 0 {
            return false;
        }
        let since = epoch.elapsed().as_millis() as u64 - last;
        since < FAILURE_WINDOW.as_millis() as u64
    }

    fn mark_failure(&self, epoch: Instant) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms
            .store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn mark_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

struct CachedResponse {
    wire: Vec<u8>,
    upstream: Arc<str>,
    expires: Instant,
}

/// The upstream pool: parsed specs, per-endpoint transports, selection
/// mode, failure bookkeeping and a TTL-aware response cache.
pub struct UpstreamPool {
    endpoints: Vec<Arc<PoolEndpoint>>,
    /// Indices of unscoped endpoints, the default serving set.
    default_set: Vec<usize>,
    mode: UpstreamMode,
    deadline: Duration,
    rr: AtomicUsize,
    epoch: Instant,
    cache: Option<Mutex<LruCache<(String, u16), CachedResponse>>>,
    cache_ttl_min: u32,
    cache_ttl_max: u32,
}

impl UpstreamPool {
    pub async fn new(
        config: &DnsConfig,
        bootstrap: &BootstrapResolver,
    ) -> Result<Self, WardenError> {
        if config.upstream_dns.is_empty() {
            return Err(WardenError::ConfigError(
                "at least one upstream must be configured".into(),
            ));
        }

        let mut endpoints = Vec::new();
        for raw in &config.upstream_dns {
            let spec = UpstreamSpec::parse(raw)?;
            match Self::build_endpoint(spec, bootstrap).await {
                Ok(endpoint) => endpoints.push(Arc::new(endpoint)),
                Err(e) => {
                    warn!(spec = %raw, error = %e, "Skipping unusable upstream");
                }
            }
        }
        if endpoints.is_empty() {
            return Err(WardenError::ConfigError(
                "no usable upstreams after parsing".into(),
            ));
        }

        let default_set: Vec<usize> = endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.spec.is_scoped())
            .map(|(i, _)| i)
            .collect();

        info!(
            endpoints = endpoints.len(),
            mode = ?config.upstream_mode,
            "Upstream pool ready"
        );

        let cache = if config.cache_size > 0 {
            Some(Mutex::new(LruCache::new(
                NonZeroUsize::new(config.cache_size).unwrap(),
            )))
        } else {
            None
        };

        Ok(Self {
            endpoints,
            default_set,
            mode: config.upstream_mode,
            deadline: Duration::from_secs(config.upstream_timeout.max(1)),
            rr: AtomicUsize::new(0),
            epoch: Instant::now(),
            cache,
            cache_ttl_min: config.cache_ttl_min,
            cache_ttl_max: config.cache_ttl_max,
        })
    }

    async fn build_endpoint(
        spec: UpstreamSpec,
        bootstrap: &BootstrapResolver,
    ) -> Result<PoolEndpoint, WardenError> {
        let resolved: Vec<SocketAddr> = match spec.hostname_needing_resolution() {
            Some(hostname) => bootstrap
                .resolve(hostname)
                .await?
                .into_iter()
                .map(|ip| SocketAddr::new(ip, spec.port))
                .collect(),
            None => vec![SocketAddr::new(spec.host.parse().unwrap(), spec.port)],
        };
        let addr = *resolved
            .first()
            .ok_or_else(|| WardenError::NotFound(format!("no address for {}", spec.host)))?;

        let (transport, tcp_fallback) = match spec.scheme {
            UpstreamScheme::Udp => (
                Transport::Udp(super::transport::udp::UdpTransport::new(addr)),
                Some(TcpTransport::new(addr)),
            ),
            UpstreamScheme::Tcp => (Transport::Tcp(TcpTransport::new(addr)), None),
            UpstreamScheme::Tls => (
                Transport::Tls(super::transport::tls::TlsTransport::new(
                    addr,
                    spec.host.clone(),
                )?),
                None,
            ),
            UpstreamScheme::Https => {
                let url = spec
                    .url
                    .clone()
                    .unwrap_or_else(|| format!("https://{}/dns-query", spec.host));
                (
                    Transport::Https(super::transport::https::HttpsTransport::new(
                        url, &spec.host, resolved,
                    )?),
                    None,
                )
            }
            UpstreamScheme::Quic => (
                Transport::Quic(super::transport::quic::QuicTransport::new(
                    addr,
                    spec.host.clone(),
                )?),
                None,
            ),
        };

        Ok(PoolEndpoint {
            display: Arc::from(spec.original.as_str()),
            spec,
            transport,
            tcp_fallback,
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
        })
    }

    /// Endpoint indices serving `host`: scoped endpoints win when any of
    /// them covers the name, otherwise the default set.
    fn serving_set(&self, host: &str) -> Vec<usize> {
        let scoped: Vec<usize> = self
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.spec.is_scoped() && e.spec.serves(host))
            .map(|(i, _)| i)
            .collect();
        if !scoped.is_empty() {
            return scoped;
        }
        self.default_set.clone()
    }

    async fn try_endpoint(
        &self,
        endpoint: &PoolEndpoint,
        query_wire: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, WardenError> {
        let response = endpoint.transport.send(query_wire, timeout).await?;
        let mut bytes = response.bytes;

        // Truncated UDP answer: same endpoint, over TCP.
        if truncated(&bytes) {
            if let Some(tcp) = &endpoint.tcp_fallback {
                debug!(upstream = %endpoint.display, "Truncated UDP answer; retrying over TCP");
                bytes = tcp.send(query_wire, timeout).await?.bytes;
            }
        }

        validate_response(query_wire, &bytes)?;
        Ok(bytes)
    }

    async fn exchange_load_balance(
        &self,
        set: &[usize],
        query_wire: &[u8],
    ) -> Result<(Vec<u8>, Arc<str>), WardenError> {
        let start = self.rr.fetch_add(1, Ordering::Relaxed);
        let mut last_err = WardenError::AllUpstreamsFailed("no upstreams in set".into());

        // First pass skips demoted endpoints; second pass tries them
        // anyway so a fully demoted set still gets served.
        for pass in 0..2 {
            for i in 0..set.len() {
                let endpoint = &self.endpoints[set[(start + i) % set.len()]];
                if pass == 0 && endpoint.demoted(self.epoch) {
                    continue;
                }
                match self.try_endpoint(endpoint, query_wire, self.deadline).await {
                    Ok(bytes) => {
                        endpoint.mark_success();
                        return Ok((bytes, Arc::clone(&endpoint.display)));
                    }
                    Err(e) => {
                        endpoint.mark_failure(self.epoch);
                        debug!(upstream = %endpoint.display, error = %e, "Upstream exchange failed");
                        last_err = e;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn exchange_parallel(
        &self,
        set: &[usize],
        query_wire: &[u8],
    ) -> Result<(Vec<u8>, Arc<str>), WardenError> {
        let futures: Vec<_> = set
            .iter()
            .map(|&i| {
                let endpoint = Arc::clone(&self.endpoints[i]);
                let wire = query_wire.to_vec();
                let deadline = self.deadline;
                let epoch = self.epoch;
                Box::pin(async move {
                    match endpoint.transport.send(&wire, deadline).await {
                        Ok(response) => {
                            let mut bytes = response.bytes;
                            if truncated(&bytes) {
                                if let Some(tcp) = &endpoint.tcp_fallback {
                                    bytes = tcp.send(&wire, deadline).await?.bytes;
                                }
                            }
                            validate_response(&wire, &bytes)?;
                            endpoint.mark_success();
                            Ok((bytes, Arc::clone(&endpoint.display)))
                        }
                        Err(e) => {
                            endpoint.mark_failure(epoch);
                            Err(e)
                        }
                    }
                })
            })
            .collect();

        if futures.is_empty() {
            return Err(WardenError::AllUpstreamsFailed("no upstreams in set".into()));
        }
        // First success wins; losers are cancelled on drop.
        match select_ok(futures).await {
            Ok((result, _rest)) => Ok(result),
            Err(e) => Err(WardenError::AllUpstreamsFailed(e.to_string())),
        }
    }

    async fn exchange_fastest(
        &self,
        set: &[usize],
        query_wire: &[u8],
    ) -> Result<(Vec<u8>, Arc<str>), WardenError> {
        let futures: Vec<_> = set
            .iter()
            .map(|&i| {
                let endpoint = Arc::clone(&self.endpoints[i]);
                let wire = query_wire.to_vec();
                let deadline = self.deadline;
                async move {
                    let bytes = endpoint.transport.send(&wire, deadline).await.ok()?.bytes;
                    validate_response(&wire, &bytes).ok()?;
                    Some((bytes, Arc::clone(&endpoint.display)))
                }
            })
            .collect();

        let answers: Vec<(Vec<u8>, Arc<str>)> = futures::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect();

        match answers.len() {
            0 => Err(WardenError::AllUpstreamsFailed(
                "no upstream answered".into(),
            )),
            1 => Ok(answers.into_iter().next().unwrap()),
            _ => Ok(Self::pick_fastest(answers).await),
        }
    }

    /// Probe every answered address with a short TCP connect and return
    /// the answer containing the quickest one.
    async fn pick_fastest(answers: Vec<(Vec<u8>, Arc<str>)>) -> (Vec<u8>, Arc<str>) {
        let mut per_answer_ips: Vec<Vec<IpAddr>> = Vec::with_capacity(answers.len());
        let mut all_ips: Vec<IpAddr> = Vec::new();
        for (wire, _) in &answers {
            let ips = answer_addresses(wire);
            for ip in &ips {
                if !all_ips.contains(ip) {
                    all_ips.push(*ip);
                }
            }
            per_answer_ips.push(ips);
        }
        if all_ips.is_empty() {
            return answers.into_iter().next().unwrap();
        }

        let probes: Vec<_> = all_ips
            .iter()
            .map(|&ip| async move {
                let started = Instant::now();
                let result = tokio::time::timeout(
                    PROBE_TIMEOUT,
                    tokio::net::TcpStream::connect(SocketAddr::new(ip, PROBE_PORT)),
                )
                .await;
                match result {
                    Ok(Ok(_)) => Some((ip, started.elapsed())),
                    _ => None,
                }
            })
            .collect();

        let mut results: Vec<(IpAddr, Duration)> = futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect();
        results.sort_by_key(|(_, elapsed)| *elapsed);

        if let Some((winner, _)) = results.first() {
            for (i, ips) in per_answer_ips.iter().enumerate() {
                if ips.contains(winner) {
                    return answers.into_iter().nth(i).unwrap();
                }
            }
        }
        answers.into_iter().next().unwrap()
    }

    async fn cache_get(&self, key: &(String, u16), query_wire: &[u8]) -> Option<UpstreamAnswer> {
        let cache = self.cache.as_ref()?;
        let now = Instant::now();
        let mut cache = cache.lock().await;
        let hit = match cache.get(key) {
            Some(entry) if entry.expires > now => {
                let mut wire = entry.wire.clone();
                // Re-stamp the transaction ID of the caller's query.
                wire[0] = query_wire[0];
                wire[1] = query_wire[1];
                Some(UpstreamAnswer {
                    wire: Bytes::from(wire),
                    upstream: Arc::clone(&entry.upstream),
                    elapsed: Duration::ZERO,
                })
            }
            _ => None,
        };
        if hit.is_none() {
            cache.pop(key);
        }
        hit
    }

    async fn cache_put(&self, key: (String, u16), wire: &[u8], upstream: &Arc<str>) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let mut ttl = response_min_ttl(wire).unwrap_or(60);
        if self.cache_ttl_min > 0 {
            ttl = ttl.max(self.cache_ttl_min);
        }
        if self.cache_ttl_max > 0 {
            ttl = ttl.min(self.cache_ttl_max);
        }
        if ttl == 0 {
            return;
        }
        let entry = CachedResponse {
            wire: wire.to_vec(),
            upstream: Arc::clone(upstream),
            expires: Instant::now() + Duration::from_secs(u64::from(ttl)),
        };
        cache.lock().await.put(key, entry);
    }
}

#[async_trait]
impl UpstreamExchanger for UpstreamPool {
    async fn exchange(&self, query_wire: &[u8], host: &str) -> Result<UpstreamAnswer, WardenError> {
        let started = Instant::now();
        let qtype = wire_qtype(query_wire).unwrap_or(0);
        let key = (host.to_string(), qtype);

        if let Some(hit) = self.cache_get(&key, query_wire).await {
            debug!(host, qtype, "Upstream cache hit");
            return Ok(hit);
        }

        let set = self.serving_set(host);
        let result = tokio::time::timeout(self.deadline, async {
            match self.mode {
                UpstreamMode::LoadBalance => self.exchange_load_balance(&set, query_wire).await,
                UpstreamMode::Parallel => self.exchange_parallel(&set, query_wire).await,
                UpstreamMode::FastestAddr => self.exchange_fastest(&set, query_wire).await,
            }
        })
        .await
        .map_err(|_| WardenError::QueryTimeout)??;

        let (wire, upstream) = result;
        self.cache_put(key, &wire, &upstream).await;

        Ok(UpstreamAnswer {
            wire: Bytes::from(wire),
            upstream,
            elapsed: started.elapsed(),
        })
    }
}

/// TC bit of a wire-format message.
fn truncated(wire: &[u8]) -> bool {
    wire.len() > 2 && wire[2] & 0x02 != 0
}

/// Cheap sanity check: long enough, matching transaction ID, QR set.
fn validate_response(query_wire: &[u8], response: &[u8]) -> Result<(), WardenError> {
    if response.len() < 12 {
        return Err(WardenError::InvalidDnsResponse("short response".into()));
    }
    if response[0..2] != query_wire[0..2] {
        return Err(WardenError::InvalidDnsResponse(
            "transaction id mismatch".into(),
        ));
    }
    if response[2] & 0x80 == 0 {
        return Err(WardenError::InvalidDnsResponse("not a response".into()));
    }
    Ok(())
}

/// Question qtype straight from the wire, skipping the encoded name.
fn wire_qtype(wire: &[u8]) -> Option<u16> {
    if wire.len() < 12 {
        return None;
    }
    let mut pos = 12;
    loop {
        let len = *wire.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        // Compression never appears in a question we built ourselves.
        if len & 0xc0 != 0 {
            return None;
        }
        pos += len + 1;
    }
    let hi = *wire.get(pos)?;
    let lo = *wire.get(pos + 1)?;
    Some(u16::from_be_bytes([hi, lo]))
}

/// A/AAAA addresses in a response's answer section.
fn answer_addresses(wire: &[u8]) -> Vec<IpAddr> {
    let Ok(message) = dns_wire::decode_message(wire) else {
        return Vec::new();
    };
    let mut ips = Vec::new();
    for record in &message.answers {
        match &record.data {
            hickory_proto::rr::RData::A(a) => ips.push(IpAddr::V4(a.0)),
            hickory_proto::rr::RData::AAAA(aaaa) => ips.push(IpAddr::V6(aaaa.0)),
            _ => {}
        }
    }
    ips
}

/// Smallest answer TTL, for cache expiry.
fn response_min_ttl(wire: &[u8]) -> Option<u32> {
    let message = dns_wire::decode_message(wire).ok()?;
    message.answers.iter().map(|r| r.ttl).min()
}
