//! In-process test rig: a real handler wired to a scripted upstream.

use async_trait::async_trait;
use bytes::Bytes;
use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME};
use hickory_proto::rr::{Name, RData, Record};
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden_dns_application::ports::{
    QueryLogStore, SafetyOracle, SafetyVerdict, SearchCriteria, SearchResult, UpstreamAnswer,
    UpstreamExchanger,
};
use warden_dns_application::ports::leases::NoLeases;
use warden_dns_domain::{
    AccessConfig, BlockingMode, ClientProtocol, DnsConfig, DnsQuestion, FilteringConfig,
    QueryLogConfig, RecordType, RewriteEntry, WardenError,
};
use warden_dns_infrastructure::filtering::{FilteringState, StatePublisher};
use warden_dns_infrastructure::querylog::QueryLog;
use warden_dns_infrastructure::server::handler::{HandleOutcome, WardenHandler};
use warden_dns_infrastructure::server::ClientRegistry;
use warden_dns_infrastructure::stats::InMemoryStats;

pub fn a_record(host: &str, ip: &str) -> Record {
    Record::from_rdata(
        Name::from_str(&format!("{}.", host)).unwrap(),
        300,
        RData::A(A(ip.parse().unwrap())),
    )
}

pub fn aaaa_record(host: &str, ip: &str) -> Record {
    Record::from_rdata(
        Name::from_str(&format!("{}.", host)).unwrap(),
        300,
        RData::AAAA(AAAA(ip.parse().unwrap())),
    )
}

pub fn cname_record(host: &str, target: &str) -> Record {
    Record::from_rdata(
        Name::from_str(&format!("{}.", host)).unwrap(),
        300,
        RData::CNAME(CNAME(Name::from_str(&format!("{}.", target)).unwrap())),
    )
}

/// Upstream double: answers from a scripted host → records table and
/// counts exchanges.
struct MockUpstream {
    answers: HashMap<String, Vec<Record>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamExchanger for MockUpstream {
    async fn exchange(&self, query_wire: &[u8], host: &str) -> Result<UpstreamAnswer, WardenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let query = Message::from_vec(query_wire)
            .map_err(|e| WardenError::InvalidDnsResponse(e.to_string()))?;
        let mut response = Message::new(query.id(), MessageType::Response, OpCode::Query);
        response.set_recursion_desired(true);
        response.set_recursion_available(true);
        for q in query.queries() {
            response.add_query(q.clone());
        }

        match self.answers.get(host) {
            Some(records) => {
                for record in records {
                    response.add_answer(record.clone());
                }
            }
            None => {
                response.set_response_code(hickory_proto::op::ResponseCode::NXDomain);
            }
        }

        let wire = response
            .to_vec()
            .map_err(|e| WardenError::InvalidDnsResponse(e.to_string()))?;
        Ok(UpstreamAnswer {
            wire: Bytes::from(wire),
            upstream: Arc::from("mock://upstream"),
            elapsed: Duration::from_micros(50),
        })
    }
}

struct FixedOracle(SafetyVerdict);

#[async_trait]
impl SafetyOracle for FixedOracle {
    async fn check(&self, _host: &str) -> SafetyVerdict {
        self.0
    }
}

pub struct TestServerBuilder {
    dns: DnsConfig,
    filtering: FilteringConfig,
    access: AccessConfig,
    upstream_answers: HashMap<String, Vec<Record>>,
    safebrowsing: SafetyVerdict,
}

impl TestServerBuilder {
    pub fn new() -> Self {
        Self {
            dns: DnsConfig {
                ratelimit: 0,
                ..Default::default()
            },
            filtering: FilteringConfig::default(),
            access: AccessConfig::default(),
            upstream_answers: HashMap::new(),
            safebrowsing: SafetyVerdict::Clean,
        }
    }

    pub fn blocking_mode(mut self, mode: BlockingMode) -> Self {
        self.dns.blocking_mode = mode;
        self
    }

    pub fn user_rules(mut self, rules: &[&str]) -> Self {
        self.filtering.user_rules = rules.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn rewrites(mut self, entries: &[(&str, &str)]) -> Self {
        self.filtering.rewrites = entries
            .iter()
            .map(|(domain, answer)| RewriteEntry::new(*domain, *answer))
            .collect();
        self
    }

    pub fn safesearch(mut self, enabled: bool) -> Self {
        self.filtering.safesearch_enabled = enabled;
        self
    }

    pub fn safebrowsing(mut self, verdict: SafetyVerdict) -> Self {
        self.filtering.safebrowsing_enabled = true;
        self.safebrowsing = verdict;
        self
    }

    pub fn blocked_services(mut self, services: &[&str]) -> Self {
        self.filtering.blocked_services = services.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn refuse_any(mut self) -> Self {
        self.dns.refuse_any = true;
        self
    }

    pub fn disable_ipv6(mut self) -> Self {
        self.dns.disable_ipv6 = true;
        self
    }

    pub fn ratelimit(mut self, qps: u32) -> Self {
        self.dns.ratelimit = qps;
        self
    }

    pub fn access(mut self, access: AccessConfig) -> Self {
        self.access = access;
        self
    }

    pub fn upstream(mut self, host: &str, records: Vec<Record>) -> Self {
        self.upstream_answers.insert(host.to_string(), records);
        self
    }

    pub fn build(self) -> TestServer {
        let dir = tempfile::tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));

        let publisher = Arc::new(StatePublisher::new(FilteringState::build(
            self.filtering,
            &self.access,
            Vec::new(),
            "",
        )));
        let upstream = Arc::new(MockUpstream {
            answers: self.upstream_answers,
            calls: Arc::clone(&calls),
        });
        let querylog = QueryLog::new(dir.path(), QueryLogConfig::default());
        let store: Arc<dyn QueryLogStore> = Arc::new(querylog);

        let handler = WardenHandler::new(
            self.dns,
            publisher,
            upstream,
            Arc::new(FixedOracle(self.safebrowsing)),
            Arc::new(FixedOracle(SafetyVerdict::Clean)),
            Arc::clone(&store),
            Arc::new(InMemoryStats::new()),
            Arc::new(ClientRegistry::new(Vec::new(), Arc::new(NoLeases))),
        );

        TestServer {
            handler,
            store,
            upstream_calls: calls,
            _dir: dir,
        }
    }
}

pub struct TestServer {
    handler: WardenHandler,
    store: Arc<dyn QueryLogStore>,
    pub upstream_calls: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn query(&self, host: &str, qtype: RecordType) -> HandleOutcome {
        self.query_from(host, qtype, "127.0.0.1".parse().unwrap(), false)
            .await
    }

    pub async fn query_from(
        &self,
        host: &str,
        qtype: RecordType,
        src: IpAddr,
        udp: bool,
    ) -> HandleOutcome {
        self.handler
            .handle_question(
                DnsQuestion::new(host, qtype),
                src,
                ClientProtocol::Plain,
                udp,
                false,
            )
            .await
    }

    pub async fn search_log(&self, criteria: SearchCriteria) -> SearchResult {
        self.store.search(criteria).await.expect("log search")
    }
}
