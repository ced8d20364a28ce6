use crate::dns_wire;
use async_trait::async_trait;
use dashmap::DashMap;
use hickory_proto::rr::{RData, RecordType as ProtoRecordType};
use rustc_hash::FxBuildHasher;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, warn};
use warden_dns_application::ports::{SafetyOracle, SafetyVerdict};
use warden_dns_domain::WardenError;

/// TXT answers are cached per 2-byte hash prefix for this long. Empty
/// answers are cached too (negative entries) so a clean prefix is not
/// re-queried on every lookup.
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Oracle lookups race this deadline; expiry means `Unknown`.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// At most this many sub-host hashes are sent per question.
const MAX_HASHES: usize = 4;

type HashPrefix = [u8; 2];
type FullHash = [u8; 32];

/// Transport abstraction for the oracle's TXT lookups.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WardenError>;
}

/// Plain-UDP TXT resolver against a fixed server.
pub struct UdpTxtResolver {
    server: SocketAddr,
}

impl UdpTxtResolver {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }
}

#[async_trait]
impl TxtLookup for UdpTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WardenError> {
        let fqdn = format!("{}.", name.trim_end_matches('.'));
        let (id, query) = dns_wire::build_query(&fqdn, ProtoRecordType::TXT)?;

        let bind: SocketAddr = if self.server.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.send_to(&query, self.server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf).await?;
        buf.truncate(len);

        let message = dns_wire::decode_message(&buf)?;
        if message.id != id {
            return Err(WardenError::InvalidDnsResponse(
                "transaction id mismatch".into(),
            ));
        }

        let mut strings = Vec::new();
        for record in &message.answers {
            if let RData::TXT(txt) = &record.data {
                for chunk in txt.txt_data.iter() {
                    strings.push(String::from_utf8_lossy(chunk).into_owned());
                }
            }
        }
        Ok(strings)
    }
}

/// Client for a hashed-prefix reputation oracle.
///
/// The question sent upstream carries only 2-byte hash prefixes; the full
/// SHA-256 hashes in the TXT answer are compared locally, so the oracle
/// never sees the actual names being checked.
pub struct SafetyServiceClient {
    zone: String,
    lookup: Arc<dyn TxtLookup>,
    cache: DashMap<HashPrefix, (Instant, Arc<Vec<FullHash>>), FxBuildHasher>,
}

impl SafetyServiceClient {
    pub fn new(zone: String, lookup: Arc<dyn TxtLookup>) -> Self {
        Self {
            zone: zone.trim_end_matches('.').to_string(),
            lookup,
            cache: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn with_udp_server(zone: String, server: SocketAddr) -> Self {
        Self::new(zone, Arc::new(UdpTxtResolver::new(server)))
    }

    /// Sub-hosts checked for `host`: suffix chains with at least two
    /// labels (the bare TLD is excluded), at most [`MAX_HASHES`], starting
    /// from the full name.
    fn candidates(host: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = host;
        loop {
            if out.len() == MAX_HASHES {
                break;
            }
            match rest.split_once('.') {
                Some((_, tail)) if !tail.is_empty() => {
                    out.push(rest.to_string());
                    rest = tail;
                }
                // `rest` is a single label (the TLD): stop.
                _ => break,
            }
        }
        out
    }

    fn hash(name: &str) -> FullHash {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.finalize().into()
    }

    fn cached(&self, prefix: &HashPrefix) -> Option<Arc<Vec<FullHash>>> {
        let entry = self.cache.get(prefix)?;
        let (stored_at, hashes) = entry.value();
        if stored_at.elapsed() > CACHE_TTL {
            drop(entry);
            self.cache.remove(prefix);
            return None;
        }
        Some(Arc::clone(hashes))
    }

    async fn check_inner(&self, host: &str) -> Result<bool, WardenError> {
        let candidates = Self::candidates(host);
        if candidates.is_empty() {
            return Ok(false);
        }
        let hashes: Vec<FullHash> = candidates.iter().map(|c| Self::hash(c)).collect();

        // Partition into cached and to-be-queried prefixes.
        let mut known: Vec<Arc<Vec<FullHash>>> = Vec::new();
        let mut missing: Vec<HashPrefix> = Vec::new();
        for hash in &hashes {
            let prefix: HashPrefix = [hash[0], hash[1]];
            match self.cached(&prefix) {
                Some(list) => known.push(list),
                None => {
                    if !missing.contains(&prefix) {
                        missing.push(prefix);
                    }
                }
            }
        }

        if !missing.is_empty() {
            let labels: Vec<String> = missing
                .iter()
                .map(|p| format!("{:02x}{:02x}", p[0], p[1]))
                .collect();
            let name = format!("{}.{}", labels.join("."), self.zone);

            let strings =
                tokio::time::timeout(LOOKUP_TIMEOUT, self.lookup.lookup_txt(&name))
                    .await
                    .map_err(|_| WardenError::QueryTimeout)??;

            // Each TXT string is one hex-encoded full hash of a blocked name.
            let mut fetched: Vec<FullHash> = Vec::new();
            for s in strings {
                let s = s.trim();
                if s.len() != 64 {
                    continue;
                }
                let mut hash = [0u8; 32];
                let mut valid = true;
                for (i, byte) in hash.iter_mut().enumerate() {
                    match u8::from_str_radix(&s[i * 2..i * 2 + 2], 16) {
                        Ok(b) => *byte = b,
                        Err(_) => {
                            valid = false;
                            break;
                        }
                    }
                }
                if valid {
                    fetched.push(hash);
                }
            }

            // Store per queried prefix; prefixes with no hashes get a
            // negative entry.
            let now = Instant::now();
            for prefix in &missing {
                let matching: Vec<FullHash> = fetched
                    .iter()
                    .filter(|h| h[0] == prefix[0] && h[1] == prefix[1])
                    .copied()
                    .collect();
                let list = Arc::new(matching);
                known.push(Arc::clone(&list));
                self.cache.insert(*prefix, (now, list));
            }
        }

        let blocked = hashes
            .iter()
            .any(|hash| known.iter().any(|list| list.contains(hash)));
        Ok(blocked)
    }
}

#[async_trait]
impl SafetyOracle for SafetyServiceClient {
    async fn check(&self, host: &str) -> SafetyVerdict {
        match self.check_inner(host).await {
            Ok(true) => SafetyVerdict::Blocked,
            Ok(false) => SafetyVerdict::Clean,
            Err(e) => {
                debug!(host, error = %e, "Safety oracle lookup failed; treating as unknown");
                SafetyVerdict::Unknown
            }
        }
    }
}

/// Oracle that always reports `Unknown`; used when the service is
/// misconfigured so the pipeline never blocks on it.
pub struct DisabledOracle;

#[async_trait]
impl SafetyOracle for DisabledOracle {
    async fn check(&self, _host: &str) -> SafetyVerdict {
        SafetyVerdict::Unknown
    }
}

/// Parse the configured oracle upstream; warns and falls back to a
/// disabled oracle on bad input.
pub fn oracle_from_config(zone: &str, upstream: &str) -> Arc<dyn SafetyOracle> {
    match upstream.parse::<SocketAddr>() {
        Ok(server) => Arc::new(SafetyServiceClient::with_udp_server(zone.to_string(), server)),
        Err(e) => {
            warn!(upstream, error = %e, "Invalid safety upstream; oracle disabled");
            Arc::new(DisabledOracle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubLookup {
        answers: Vec<String>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TxtLookup for StubLookup {
        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WardenError> {
            self.queries.lock().unwrap().push(name.to_string());
            Ok(self.answers.clone())
        }
    }

    fn hex(hash: &FullHash) -> String {
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            SafetyServiceClient::candidates("a.b.c.example.com"),
            vec!["a.b.c.example.com", "b.c.example.com", "c.example.com", "example.com"]
        );
        assert_eq!(SafetyServiceClient::candidates("example.com"), vec!["example.com"]);
        assert!(SafetyServiceClient::candidates("com").is_empty());
    }

    #[tokio::test]
    async fn test_blocked_host_detected() {
        let blocked_hash = SafetyServiceClient::hash("bad.example.com");
        let lookup = Arc::new(StubLookup {
            answers: vec![hex(&blocked_hash)],
            queries: Mutex::new(Vec::new()),
        });
        let client = SafetyServiceClient::new("sb.test".into(), lookup);
        assert_eq!(client.check("bad.example.com").await, SafetyVerdict::Blocked);
    }

    #[tokio::test]
    async fn test_clean_host_and_negative_cache() {
        let lookup = Arc::new(StubLookup {
            answers: vec![],
            queries: Mutex::new(Vec::new()),
        });
        let client = SafetyServiceClient::new("sb.test".into(), Arc::clone(&lookup) as Arc<dyn TxtLookup>);

        assert_eq!(client.check("clean.example.com").await, SafetyVerdict::Clean);
        let first_round = lookup.queries.lock().unwrap().len();
        assert_eq!(first_round, 1);

        // Second check hits the negative cache: no new oracle traffic.
        assert_eq!(client.check("clean.example.com").await, SafetyVerdict::Clean);
        assert_eq!(lookup.queries.lock().unwrap().len(), first_round);
    }

    #[tokio::test]
    async fn test_query_carries_hash_prefixes() {
        let lookup = Arc::new(StubLookup {
            answers: vec![],
            queries: Mutex::new(Vec::new()),
        });
        let client = SafetyServiceClient::new("sb.test".into(), Arc::clone(&lookup) as Arc<dyn TxtLookup>);
        client.check("sub.example.com").await;

        let queries = lookup.queries.lock().unwrap();
        let name = &queries[0];
        assert!(name.ends_with(".sb.test"));
        let h1 = SafetyServiceClient::hash("sub.example.com");
        let h2 = SafetyServiceClient::hash("example.com");
        assert!(name.contains(&format!("{:02x}{:02x}", h1[0], h1[1])));
        assert!(name.contains(&format!("{:02x}{:02x}", h2[0], h2[1])));
    }

    struct FailingLookup;

    #[async_trait]
    impl TxtLookup for FailingLookup {
        async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>, WardenError> {
            Err(WardenError::QueryTimeout)
        }
    }

    #[tokio::test]
    async fn test_oracle_failure_is_unknown() {
        let client = SafetyServiceClient::new("sb.test".into(), Arc::new(FailingLookup));
        assert_eq!(client.check("any.example.com").await, SafetyVerdict::Unknown);
    }
}
