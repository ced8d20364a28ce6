use crate::dns_wire;
use dashmap::DashMap;
use hickory_proto::rr::{RData, RecordType as ProtoRecordType};
use rustc_hash::FxBuildHasher;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, warn};
use warden_dns_domain::WardenError;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(1800);

/// Plain-DNS resolver used only for the hostnames of secure upstreams.
///
/// Results are cached; a failed bootstrap falls through to the next
/// configured resolver.
pub struct BootstrapResolver {
    servers: Vec<SocketAddr>,
    cache: DashMap<String, (Instant, Vec<IpAddr>), FxBuildHasher>,
}

impl BootstrapResolver {
    pub fn new(specs: &[String]) -> Self {
        let mut servers = Vec::new();
        for spec in specs {
            let spec = spec.trim();
            let parsed = if spec.contains(':') && spec.parse::<SocketAddr>().is_ok() {
                spec.parse::<SocketAddr>().ok()
            } else {
                spec.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53))
            };
            match parsed {
                Some(addr) => servers.push(addr),
                None => warn!(spec, "Ignoring non-IP bootstrap resolver"),
            }
        }
        Self {
            servers,
            cache: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Resolve `hostname` to addresses via the first bootstrap that
    /// answers. IPv4 answers come first.
    pub async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, WardenError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        if let Some(entry) = self.cache.get(hostname) {
            let (stored_at, ips) = entry.value();
            if stored_at.elapsed() < CACHE_TTL {
                return Ok(ips.clone());
            }
        }

        let mut last_err = WardenError::AllUpstreamsFailed("no bootstrap resolvers".into());
        for server in &self.servers {
            match self.resolve_via(*server, hostname).await {
                Ok(ips) if !ips.is_empty() => {
                    debug!(hostname, count = ips.len(), "Bootstrap resolution succeeded");
                    self.cache
                        .insert(hostname.to_string(), (Instant::now(), ips.clone()));
                    return Ok(ips);
                }
                Ok(_) => {
                    last_err = WardenError::NotFound(format!("no addresses for {}", hostname));
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn resolve_via(
        &self,
        server: SocketAddr,
        hostname: &str,
    ) -> Result<Vec<IpAddr>, WardenError> {
        let fqdn = format!("{}.", hostname.trim_end_matches('.'));
        let mut ips = Vec::new();
        for rtype in [ProtoRecordType::A, ProtoRecordType::AAAA] {
            match self.query_one(server, &fqdn, rtype).await {
                Ok(mut found) => ips.append(&mut found),
                Err(e) => {
                    // An AAAA failure should not discard A results.
                    if ips.is_empty() && rtype == ProtoRecordType::A {
                        return Err(e);
                    }
                }
            }
        }
        Ok(ips)
    }

    async fn query_one(
        &self,
        server: SocketAddr,
        fqdn: &str,
        rtype: ProtoRecordType,
    ) -> Result<Vec<IpAddr>, WardenError> {
        let (id, query) = dns_wire::build_query(fqdn, rtype)?;

        let bind: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind).await?;

        tokio::time::timeout(RESOLVE_TIMEOUT, socket.send_to(&query, server))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;

        let mut buf = vec![0u8; 2048];
        let (len, _) = tokio::time::timeout(RESOLVE_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;
        buf.truncate(len);

        let message = dns_wire::decode_message(&buf)?;
        if message.id != id {
            return Err(WardenError::InvalidDnsResponse("transaction id mismatch".into()));
        }

        let mut ips = Vec::new();
        for record in &message.answers {
            match &record.data {
                RData::A(a) => ips.push(IpAddr::V4(a.0)),
                RData::AAAA(aaaa) => ips.push(IpAddr::V6(aaaa.0)),
                _ => {}
            }
        }
        Ok(ips)
    }
}
