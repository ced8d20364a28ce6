use super::clients::{ClientRegistry, EffectiveSettings};
use super::ratelimit::RateLimiter;
use super::synth::{SynthesizedReply, Synthesizer};
use crate::dns_wire;
use crate::filtering::hosts::RewriteOutcome;
use crate::filtering::state::{FilteringState, StatePublisher};
use async_trait::async_trait;
use chrono::Utc;
use hickory_proto::op::{Edns, Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsOption};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType as ProtoRecordType};
use hickory_proto::xfer::Protocol;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use warden_dns_application::ports::{
    QueryLogRecord, QueryLogStore, RuleMatcher, SafetyOracle, SafetyVerdict, StatsObservation,
    StatsSink, UpstreamExchanger,
};
use warden_dns_domain::{
    ClientProtocol, DnsConfig, DnsQuestion, FilterReason, FilterVerdict, RecordType, RewriteAnswer,
    WardenError,
};

/// Prefix lengths for the EDNS client-subnet option.
const ECS_V4_PREFIX: u8 = 24;
const ECS_V6_PREFIX: u8 = 56;

/// What one question resolved to, before wire framing.
pub struct HandledQuery {
    pub code: ResponseCode,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub verdict: FilterVerdict,
    pub upstream: String,
    pub orig_answer: Option<Vec<u8>>,
}

/// Outcome of gating plus the pipeline.
pub enum HandleOutcome {
    Reply(HandledQuery),
    /// Rate limit trip or denied client: no reply at all.
    Drop,
}

/// The DNS server's request handler: applies the decision pipeline and
/// emits one log record and one stats observation per completed query.
pub struct WardenHandler {
    config: DnsConfig,
    synth: Synthesizer,
    state: Arc<StatePublisher>,
    upstream: Arc<dyn UpstreamExchanger>,
    safebrowsing: Arc<dyn SafetyOracle>,
    parental: Arc<dyn SafetyOracle>,
    querylog: Arc<dyn QueryLogStore>,
    stats: Arc<dyn StatsSink>,
    clients: Arc<ClientRegistry>,
    ratelimit: RateLimiter,
}

impl WardenHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DnsConfig,
        state: Arc<StatePublisher>,
        upstream: Arc<dyn UpstreamExchanger>,
        safebrowsing: Arc<dyn SafetyOracle>,
        parental: Arc<dyn SafetyOracle>,
        querylog: Arc<dyn QueryLogStore>,
        stats: Arc<dyn StatsSink>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            synth: Synthesizer::new(&config),
            ratelimit: RateLimiter::new(config.ratelimit),
            config,
            state,
            upstream,
            safebrowsing,
            parental,
            querylog,
            stats,
            clients,
        }
    }

    /// Gate, decide, answer and log one question. `udp` marks queries that
    /// are subject to the rate limit.
    pub async fn handle_question(
        &self,
        question: DnsQuestion,
        src: IpAddr,
        proto: ClientProtocol,
        udp: bool,
        dnssec_ok: bool,
    ) -> HandleOutcome {
        let started = Instant::now();

        if udp && !self.ratelimit.allow(src) {
            debug!(client = %src, "Rate limit exceeded; dropping query");
            return HandleOutcome::Drop;
        }

        // One snapshot per query; reconfiguration never affects us mid-way.
        let state = self.state.load();

        if state.access.check_client(src) == crate::filtering::AccessDecision::DropClient {
            debug!(client = %src, "Client denied by access gate");
            return HandleOutcome::Drop;
        }

        let settings = self.clients.effective_settings(src, &state.config);

        let result = self
            .process(state.as_ref(), &question, &settings, src, dnssec_ok)
            .await;

        let handled = match result {
            Ok(handled) => handled,
            Err(e) => {
                warn!(host = %question.host, error = %e, "Query processing failed");
                HandledQuery {
                    code: ResponseCode::ServFail,
                    answers: Vec::new(),
                    authorities: Vec::new(),
                    verdict: FilterVerdict::NotFiltered,
                    upstream: String::new(),
                    orig_answer: None,
                }
            }
        };

        self.emit(state.as_ref(), &question, src, proto, started, &handled);
        HandleOutcome::Reply(handled)
    }
}

impl WardenHandler {
    async fn process(
        &self,
        state: &FilteringState,
        question: &DnsQuestion,
        settings: &EffectiveSettings,
        src: IpAddr,
        dnssec_ok: bool,
    ) -> Result<HandledQuery, WardenError> {
        // Access gate, host side.
        if state.access.check_host(&question.host) == crate::filtering::AccessDecision::BlockHost {
            let reply = self.synth.blocked(&question.host, question.qtype, None);
            return Ok(self.local_reply(
                reply,
                FilterVerdict::BlockedByRule {
                    list_id: 0,
                    rule: Arc::from(question.host.as_str()),
                },
            ));
        }

        // Reject policy.
        if self.config.refuse_any && question.qtype == RecordType::ANY {
            return Ok(self.local_reply(
                SynthesizedReply {
                    code: ResponseCode::NotImp,
                    answers: Vec::new(),
                },
                FilterVerdict::NotFiltered,
            ));
        }

        // PTR answers for known local addresses.
        if question.qtype == RecordType::PTR {
            if let Some(ip) = parse_arpa(&question.host) {
                if let Some(names) = state.hosts.resolve_ptr(ip) {
                    let reply = self.synth.ptr(&question.host, names);
                    return Ok(self.local_reply(
                        reply,
                        FilterVerdict::Rewritten {
                            answer: RewriteAnswer::default(),
                            list_id: None,
                            rule: None,
                        },
                    ));
                }
            }
        }

        // Hosts / rewrites.
        let mut upstream_name: Option<(Vec<String>, String)> = None;
        match state.hosts.resolve(&question.host, question.qtype) {
            RewriteOutcome::None | RewriteOutcome::Passthrough | RewriteOutcome::TypePassthrough => {}
            RewriteOutcome::Answer { chain, answer } => {
                let reply = self.synth.rewrite(&question.host, question.qtype, &chain, &answer);
                return Ok(self.local_reply(
                    reply,
                    FilterVerdict::Rewritten {
                        answer,
                        list_id: None,
                        rule: None,
                    },
                ));
            }
            RewriteOutcome::CnameUpstream { chain, target } => {
                upstream_name = Some((chain, target));
            }
        }

        let mut allowed: Option<FilterVerdict> = None;

        if settings.filtering_enabled {
            // Blocked services, client set overriding global.
            let verdict = state.services.match_host(
                &question.host,
                question.qtype,
                &settings.blocked_services,
            );
            if let FilterVerdict::BlockedByService { .. } = verdict {
                let reply = self.synth.blocked(&question.host, question.qtype, None);
                return Ok(self.local_reply(reply, verdict));
            }

            // Rule store.
            match state
                .rule_store
                .match_host(&question.host, question.qtype, &settings.tags)
            {
                FilterVerdict::NotFiltered => {}
                verdict @ FilterVerdict::Allowed { .. } => {
                    allowed = Some(verdict);
                }
                verdict @ FilterVerdict::BlockedByRule { .. } => {
                    let reply = self.synth.blocked(&question.host, question.qtype, None);
                    return Ok(self.local_reply(reply, verdict));
                }
                FilterVerdict::Rewritten { answer, list_id, rule } => {
                    // Hosts-style rule: the rule's address in default mode,
                    // the blocking mode's shape otherwise.
                    let reply =
                        self.synth
                            .blocked(&question.host, question.qtype, Some(&answer));
                    return Ok(self.local_reply(
                        reply,
                        FilterVerdict::Rewritten { answer, list_id, rule },
                    ));
                }
                verdict => {
                    let reply = self.synth.blocked(&question.host, question.qtype, None);
                    return Ok(self.local_reply(reply, verdict));
                }
            }

            if allowed.is_none() {
                // Safe search.
                if settings.safesearch_enabled {
                    if let Some(answer) =
                        state.safe_search.rewrite(&question.host, question.qtype)
                    {
                        return self
                            .safe_search_reply(question, answer, src, dnssec_ok)
                            .await;
                    }
                }

                // Safety services, in parallel when both apply.
                let (sb, par) = tokio::join!(
                    async {
                        if settings.safebrowsing_enabled {
                            self.safebrowsing.check(&question.host).await
                        } else {
                            SafetyVerdict::Unknown
                        }
                    },
                    async {
                        if settings.parental_enabled {
                            self.parental.check(&question.host).await
                        } else {
                            SafetyVerdict::Unknown
                        }
                    }
                );
                if sb == SafetyVerdict::Blocked {
                    let reply = self.synth.blocked(&question.host, question.qtype, None);
                    return Ok(self.local_reply(reply, FilterVerdict::BlockedBySafeBrowsing));
                }
                if par == SafetyVerdict::Blocked {
                    let reply = self.synth.blocked(&question.host, question.qtype, None);
                    return Ok(self.local_reply(reply, FilterVerdict::BlockedByParental));
                }
            }
        }

        // IPv6 globally disabled: AAAA gets an empty success, no upstream.
        if self.config.disable_ipv6 && question.qtype == RecordType::AAAA {
            return Ok(HandledQuery {
                code: ResponseCode::NoError,
                answers: Vec::new(),
                authorities: Vec::new(),
                verdict: allowed.unwrap_or(FilterVerdict::NotFiltered),
                upstream: String::new(),
                orig_answer: None,
            });
        }

        // Upstream.
        let (chain, target) = match upstream_name {
            Some((chain, target)) => (chain, target),
            None => (Vec::new(), question.host.clone()),
        };
        let (_, query_wire) =
            self.build_upstream_query(&target, question.qtype, src, dnssec_ok)?;
        let answer = self.upstream.exchange(&query_wire, &target).await?;
        let message = dns_wire::decode_message(&answer.wire)?;

        let mut answers: Vec<Record> = message.answers;
        let authorities: Vec<Record> = message.authorities;
        let code = message.response_code;

        // Post-response re-check over CNAME targets and answer addresses;
        // allow rules are ignored in this pass.
        if settings.filtering_enabled {
            if let Some(verdict) = self.recheck(state, settings, &answers, question.qtype).await {
                let reply = self.synth.blocked(&question.host, question.qtype, None);
                let mut handled = self.local_reply(reply, verdict);
                handled.orig_answer = Some(answer.wire.to_vec());
                handled.upstream = answer.upstream.to_string();
                return Ok(handled);
            }
        }

        if self.config.disable_ipv6 {
            answers.retain(|r| r.record_type() != ProtoRecordType::AAAA);
        }

        // Graft a local CNAME chain in front of the upstream answer.
        let (verdict, answers) = if chain.is_empty() {
            (allowed.unwrap_or(FilterVerdict::NotFiltered), answers)
        } else {
            let rewrite = RewriteAnswer {
                cname: chain.first().cloned(),
                ..Default::default()
            };
            let mut grafted = self
                .synth
                .rewrite(&question.host, question.qtype, &chain, &RewriteAnswer::default())
                .answers;
            grafted.extend(answers);
            (
                FilterVerdict::Rewritten {
                    answer: rewrite,
                    list_id: None,
                    rule: None,
                },
                grafted,
            )
        };

        Ok(HandledQuery {
            code,
            answers,
            authorities,
            verdict,
            upstream: answer.upstream.to_string(),
            orig_answer: None,
        })
    }

    /// Safe-search verdicts with no fixed address resolve the safe
    /// endpoint through upstream and graft it under the engine's name.
    async fn safe_search_reply(
        &self,
        question: &DnsQuestion,
        answer: RewriteAnswer,
        src: IpAddr,
        dnssec_ok: bool,
    ) -> Result<HandledQuery, WardenError> {
        let has_address = match question.qtype {
            RecordType::A => !answer.ipv4.is_empty(),
            RecordType::AAAA => !answer.ipv6.is_empty(),
            _ => false,
        };

        let chain: Vec<String> = answer.cname.clone().into_iter().collect();
        if has_address {
            let reply = self
                .synth
                .rewrite(&question.host, question.qtype, &chain, &answer);
            return Ok(self.local_reply(
                reply,
                FilterVerdict::SafeSearch { answer },
            ));
        }

        let Some(safe_host) = answer.cname.clone() else {
            let reply = self
                .synth
                .rewrite(&question.host, question.qtype, &[], &answer);
            return Ok(self.local_reply(reply, FilterVerdict::SafeSearch { answer }));
        };

        let (_, query_wire) =
            self.build_upstream_query(&safe_host, question.qtype, src, dnssec_ok)?;
        let upstream_answer = self.upstream.exchange(&query_wire, &safe_host).await?;
        let message = dns_wire::decode_message(&upstream_answer.wire)?;

        let mut answers = self
            .synth
            .rewrite(&question.host, question.qtype, &chain, &RewriteAnswer::default())
            .answers;
        answers.extend(message.answers.iter().cloned());

        let mut handled = HandledQuery {
            code: message.response_code,
            answers,
            authorities: Vec::new(),
            verdict: FilterVerdict::SafeSearch { answer },
            upstream: upstream_answer.upstream.to_string(),
            orig_answer: None,
        };
        if handled.code == ResponseCode::NXDomain {
            handled.code = ResponseCode::NoError;
        }
        Ok(handled)
    }

    /// Re-run rules and safety services over the upstream answer.
    async fn recheck(
        &self,
        state: &FilteringState,
        settings: &EffectiveSettings,
        answers: &[Record],
        qtype: RecordType,
    ) -> Option<FilterVerdict> {
        for record in answers {
            let candidate = match &record.data {
                RData::CNAME(cname) => {
                    normalize_name(&cname.0.to_string())
                }
                RData::A(a) => a.0.to_string(),
                RData::AAAA(aaaa) => aaaa.0.to_string(),
                _ => continue,
            };

            let verdict = state.rule_store.match_host_ignoring_allow(&candidate, qtype);
            if verdict.is_blocking() || matches!(verdict, FilterVerdict::Rewritten { rule: Some(_), .. }) {
                debug!(candidate, "Post-response re-check blocked an answer record");
                return Some(match verdict {
                    FilterVerdict::Rewritten { list_id, rule, .. } => {
                        FilterVerdict::BlockedByRule {
                            list_id: list_id.unwrap_or(0),
                            rule: rule.unwrap_or_else(|| Arc::from("")),
                        }
                    }
                    other => other,
                });
            }

            // Safety oracles only see hostnames, not addresses.
            if matches!(&record.data, RData::CNAME(_)) {
                if settings.safebrowsing_enabled
                    && self.safebrowsing.check(&candidate).await == SafetyVerdict::Blocked
                {
                    return Some(FilterVerdict::BlockedBySafeBrowsing);
                }
                if settings.parental_enabled
                    && self.parental.check(&candidate).await == SafetyVerdict::Blocked
                {
                    return Some(FilterVerdict::BlockedByParental);
                }
            }
        }
        None
    }

    fn local_reply(&self, reply: SynthesizedReply, verdict: FilterVerdict) -> HandledQuery {
        HandledQuery {
            code: reply.code,
            answers: reply.answers,
            authorities: Vec::new(),
            verdict,
            upstream: String::new(),
            orig_answer: None,
        }
    }

    fn build_upstream_query(
        &self,
        host: &str,
        qtype: RecordType,
        client: IpAddr,
        dnssec_ok: bool,
    ) -> Result<(u16, Vec<u8>), WardenError> {
        let name = Name::from_str(&format!("{}.", host.trim_end_matches('.')))
            .map_err(|e| WardenError::InvalidDomainName(format!("{}: {}", host, e)))?;

        let mut query = Query::new();
        query.set_name(name);
        query.set_query_type(ProtoRecordType::from(qtype.to_u16()));
        query.set_query_class(DNSClass::IN);

        let id = fastrand::u16(..);
        let mut message = Message::new(id, MessageType::Query, OpCode::Query);
        message.metadata.recursion_desired = true;
        message.add_query(query);

        let mut edns = Edns::new();
        edns.set_version(0);
        edns.set_max_payload(self.config.max_udp_size.max(512));
        if self.config.enable_dnssec && dnssec_ok {
            edns.set_dnssec_ok(true);
        }
        message.set_edns(edns);
        self.apply_ecs(&mut message, client);

        let wire = dns_wire::encode_message(&message)?;
        Ok((id, wire))
    }

    /// Attach an EDNS client-subnet option when configured. Split out of
    /// the query builder because only client-facing questions carry it.
    fn apply_ecs(&self, message: &mut Message, client: IpAddr) {
        if !self.config.edns_client_subnet {
            return;
        }
        let (addr, prefix) = match client {
            IpAddr::V4(v4) => {
                let mut octets = v4.octets();
                octets[3] = 0;
                (IpAddr::V4(octets.into()), ECS_V4_PREFIX)
            }
            IpAddr::V6(v6) => {
                let mut segments = v6.segments();
                segments[3] &= 0xff00;
                for segment in segments.iter_mut().skip(4) {
                    *segment = 0;
                }
                (IpAddr::V6(segments.into()), ECS_V6_PREFIX)
            }
        };
        if let Some(edns) = message.edns.as_mut() {
            let subnet = ClientSubnet::new(addr, prefix, 0);
            edns.options_mut().insert(EdnsOption::Subnet(subnet));
        }
    }

    /// Append the log record and stats observation for one reply.
    fn emit(
        &self,
        state: &FilteringState,
        question: &DnsQuestion,
        src: IpAddr,
        proto: ClientProtocol,
        started: Instant,
        handled: &HandledQuery,
    ) {
        let elapsed = started.elapsed();
        let reason = if handled.code == ResponseCode::ServFail
            && handled.verdict == FilterVerdict::NotFiltered
            && handled.answers.is_empty()
            && handled.upstream.is_empty()
        {
            FilterReason::NotFilteredError
        } else {
            handled.verdict.reason()
        };

        let answer_wire = pack_response(question, handled).unwrap_or_default();

        let service_name = match &handled.verdict {
            FilterVerdict::BlockedByService { service } => Some(service.to_string()),
            _ => None,
        };

        self.querylog.append(QueryLogRecord {
            client_ip: src,
            timestamp: Utc::now(),
            question: question.clone(),
            client_proto: proto,
            answer: answer_wire,
            orig_answer: handled.orig_answer.clone(),
            reason,
            rule: handled.verdict.rule_text().map(str::to_string),
            filter_list_id: handled.verdict.list_id(),
            service_name,
            elapsed,
            upstream: handled.upstream.clone(),
        });

        self.stats.record(StatsObservation {
            host: question.host.clone(),
            client_ip: src,
            reason,
            elapsed,
        });

        // Fill the rDNS cache in the background for unknown sources.
        if self.clients.wants_rdns(src, &state.hosts) {
            self.spawn_rdns(src);
        }
    }

    fn spawn_rdns(&self, ip: IpAddr) {
        let upstream = Arc::clone(&self.upstream);
        let clients = Arc::clone(&self.clients);
        tokio::spawn(async move {
            let arpa = reverse_name(ip);
            let name = match dns_wire::build_query(&arpa, ProtoRecordType::PTR) {
                Ok((_, wire)) => match upstream.exchange(&wire, &arpa).await {
                    Ok(answer) => dns_wire::decode_message(&answer.wire)
                        .ok()
                        .and_then(|message| {
                            message.answers.iter().find_map(|record| {
                                match &record.data {
                                    RData::PTR(ptr) => Some(normalize_name(&ptr.0.to_string())),
                                    _ => None,
                                }
                            })
                        }),
                    Err(_) => None,
                },
                Err(_) => None,
            };
            clients.store_rdns(ip, name);
        });
    }
}

#[async_trait]
impl RequestHandler for WardenHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let src = request.src().ip();
        let protocol = request.protocol();

        // Malformed or empty question section: drop without a reply.
        let Some(query) = request.queries().first() else {
            return serve_failed(request);
        };

        let question = DnsQuestion::new(
            query.name().to_string(),
            RecordType::from_u16(u16::from(query.query_type())),
        );
        let proto = match protocol {
            Protocol::Https | Protocol::H3 => ClientProtocol::Doh,
            Protocol::Tls => ClientProtocol::Dot,
            Protocol::Quic => ClientProtocol::Doq,
            _ => ClientProtocol::Plain,
        };
        let dnssec_ok = request.edns().map(|e| e.dnssec_ok()).unwrap_or(false);
        let udp = protocol == Protocol::Udp;

        let outcome = self
            .handle_question(question, src, proto, udp, dnssec_ok)
            .await;

        let handled = match outcome {
            HandleOutcome::Reply(handled) => handled,
            HandleOutcome::Drop => return serve_failed(request),
        };

        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(false);
        header.set_recursion_available(true);
        header.set_response_code(handled.code);

        let response = builder.build(
            header,
            handled.answers.iter(),
            handled.authorities.iter(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "Failed to send DNS response");
                serve_failed(request)
            }
        }
    }
}

/// ResponseInfo for queries that got no reply; only the server's internal
/// accounting sees it.
fn serve_failed(request: &Request) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(ResponseCode::ServFail);
    ResponseInfo::from(header)
}

/// Pack the reply as a standalone message for the query log.
fn pack_response(question: &DnsQuestion, handled: &HandledQuery) -> Option<Vec<u8>> {
    let name = Name::from_str(&format!("{}.", question.host.trim_end_matches('.'))).ok()?;
    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(ProtoRecordType::from(question.qtype.to_u16()));
    query.set_query_class(DNSClass::IN);

    let mut message = Message::new(0, MessageType::Response, OpCode::Query);
    message.set_response_code(handled.code);
    message.set_recursion_desired(true);
    message.set_recursion_available(true);
    message.add_query(query);
    for record in &handled.answers {
        message.add_answer(record.clone());
    }
    for record in &handled.authorities {
        message.add_name_server(record.clone());
    }
    dns_wire::encode_message(&message).ok()
}

fn normalize_name(name: &str) -> String {
    let mut name = name.to_ascii_lowercase();
    if name.ends_with('.') && name.len() > 1 {
        name.pop();
    }
    name
}

/// `4.3.2.1.in-addr.arpa` / nibble-format `ip6.arpa` → address.
fn parse_arpa(host: &str) -> Option<IpAddr> {
    if let Some(rest) = host.strip_suffix(".in-addr.arpa") {
        let octets: Vec<u8> = rest
            .split('.')
            .rev()
            .map(|part| part.parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        if octets.len() != 4 {
            return None;
        }
        return Some(IpAddr::from([octets[0], octets[1], octets[2], octets[3]]));
    }
    if let Some(rest) = host.strip_suffix(".ip6.arpa") {
        let nibbles: Vec<u8> = rest
            .split('.')
            .rev()
            .map(|part| {
                if part.len() == 1 {
                    u8::from_str_radix(part, 16).ok()
                } else {
                    None
                }
            })
            .collect::<Option<_>>()?;
        if nibbles.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in nibbles.chunks(2).enumerate() {
            bytes[i] = (chunk[0] << 4) | chunk[1];
        }
        return Some(IpAddr::from(bytes));
    }
    None
}

/// Reverse-lookup name for an address.
fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0x0f));
                labels.push(format!("{:x}", byte >> 4));
            }
            format!("{}.ip6.arpa.", labels.join("."))
        }
    }
}
