use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, CNAME, PTR};
use hickory_proto::rr::{Name, RData, Record};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;
use warden_dns_domain::{BlockingMode, DnsConfig, RecordType, RewriteAnswer};

/// Synthesized reply: rcode plus answer records.
#[derive(Debug)]
pub struct SynthesizedReply {
    pub code: ResponseCode,
    pub answers: Vec<Record>,
}

impl SynthesizedReply {
    fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            answers: Vec::new(),
        }
    }
}

/// Builds wire answers for local verdicts: blocked replies per the
/// configured blocking mode, rewrite chains, and PTR answers.
pub struct Synthesizer {
    mode: BlockingMode,
    blocking_ipv4: std::net::Ipv4Addr,
    blocking_ipv6: std::net::Ipv6Addr,
    ttl: u32,
}

impl Synthesizer {
    pub fn new(config: &DnsConfig) -> Self {
        Self {
            mode: config.blocking_mode,
            blocking_ipv4: config.blocking_ipv4,
            blocking_ipv6: config.blocking_ipv6,
            ttl: config.blocked_response_ttl,
        }
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Reply for a blocking verdict. `rule_answer` carries the hosts-rule
    /// address when the block came from a hosts-style rule; in `default`
    /// mode that address is the answer.
    pub fn blocked(
        &self,
        qname: &str,
        qtype: RecordType,
        rule_answer: Option<&RewriteAnswer>,
    ) -> SynthesizedReply {
        match self.mode {
            BlockingMode::Refused => SynthesizedReply::empty(ResponseCode::Refused),
            BlockingMode::Nxdomain => SynthesizedReply::empty(ResponseCode::NXDomain),
            BlockingMode::NullIp => self.address_reply(
                qname,
                qtype,
                IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
            ),
            BlockingMode::CustomIp => self.address_reply(
                qname,
                qtype,
                IpAddr::V4(self.blocking_ipv4),
                IpAddr::V6(self.blocking_ipv6),
            ),
            BlockingMode::Default => match rule_answer {
                Some(answer) => self.rewrite(qname, qtype, &[], answer),
                None => SynthesizedReply::empty(ResponseCode::NXDomain),
            },
        }
    }

    fn address_reply(
        &self,
        qname: &str,
        qtype: RecordType,
        v4: IpAddr,
        v6: IpAddr,
    ) -> SynthesizedReply {
        let Some(name) = fqdn(qname) else {
            return SynthesizedReply::empty(ResponseCode::ServFail);
        };
        let mut answers = Vec::new();
        match (qtype, v4, v6) {
            (RecordType::A, IpAddr::V4(ip), _) => {
                answers.push(Record::from_rdata(name, self.ttl, RData::A(A(ip))));
            }
            (RecordType::AAAA, _, IpAddr::V6(ip)) => {
                answers.push(Record::from_rdata(name, self.ttl, RData::AAAA(AAAA(ip))));
            }
            _ => {}
        }
        SynthesizedReply {
            code: ResponseCode::NoError,
            answers,
        }
    }

    /// Reply for a rewrite verdict: the CNAME chain (question → hop → …)
    /// followed by the terminal addresses matching the question type.
    pub fn rewrite(
        &self,
        qname: &str,
        qtype: RecordType,
        chain: &[String],
        answer: &RewriteAnswer,
    ) -> SynthesizedReply {
        let Some(mut owner) = fqdn(qname) else {
            return SynthesizedReply::empty(ResponseCode::ServFail);
        };
        let mut answers = Vec::new();

        for hop in chain {
            let Some(target) = fqdn(hop) else {
                debug!(hop, "Skipping unencodable rewrite hop");
                continue;
            };
            answers.push(Record::from_rdata(
                owner,
                self.ttl,
                RData::CNAME(CNAME(target.clone())),
            ));
            owner = target;
        }

        match qtype {
            RecordType::A => {
                for ip in &answer.ipv4 {
                    answers.push(Record::from_rdata(owner.clone(), self.ttl, RData::A(A(*ip))));
                }
            }
            RecordType::AAAA => {
                for ip in &answer.ipv6 {
                    answers.push(Record::from_rdata(
                        owner.clone(),
                        self.ttl,
                        RData::AAAA(AAAA(*ip)),
                    ));
                }
            }
            _ => {}
        }

        SynthesizedReply {
            code: ResponseCode::NoError,
            answers,
        }
    }

    /// PTR reply for a reverse question answered from `/etc/hosts`.
    pub fn ptr(&self, qname: &str, names: &[String]) -> SynthesizedReply {
        let Some(owner) = fqdn(qname) else {
            return SynthesizedReply::empty(ResponseCode::ServFail);
        };
        let mut answers = Vec::new();
        for name in names {
            if let Some(target) = fqdn(name) {
                answers.push(Record::from_rdata(
                    owner.clone(),
                    self.ttl,
                    RData::PTR(PTR(target)),
                ));
            }
        }
        SynthesizedReply {
            code: ResponseCode::NoError,
            answers,
        }
    }
}

fn fqdn(name: &str) -> Option<Name> {
    Name::from_str(&format!("{}.", name.trim_end_matches('.'))).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_dns_domain::BlockingMode;

    fn config(mode: BlockingMode) -> DnsConfig {
        DnsConfig {
            blocking_mode: mode,
            blocking_ipv4: "198.51.100.7".parse().unwrap(),
            blocking_ipv6: "2001:db8::7".parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_nxdomain_mode() {
        let synth = Synthesizer::new(&config(BlockingMode::Nxdomain));
        let reply = synth.blocked("ads.example", RecordType::A, None);
        assert_eq!(reply.code, ResponseCode::NXDomain);
        assert!(reply.answers.is_empty());
    }

    #[test]
    fn test_refused_mode() {
        let synth = Synthesizer::new(&config(BlockingMode::Refused));
        let reply = synth.blocked("ads.example", RecordType::A, None);
        assert_eq!(reply.code, ResponseCode::Refused);
    }

    #[test]
    fn test_null_ip_mode() {
        let synth = Synthesizer::new(&config(BlockingMode::NullIp));
        let reply = synth.blocked("ads.example", RecordType::A, None);
        assert_eq!(reply.code, ResponseCode::NoError);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].data().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_custom_ip_mode() {
        let synth = Synthesizer::new(&config(BlockingMode::CustomIp));
        let reply = synth.blocked("ads.example", RecordType::AAAA, None);
        assert_eq!(reply.answers[0].data().to_string(), "2001:db8::7");
    }

    #[test]
    fn test_default_mode_adblock_rule_is_nxdomain() {
        let synth = Synthesizer::new(&config(BlockingMode::Default));
        let reply = synth.blocked("ads.example", RecordType::A, None);
        assert_eq!(reply.code, ResponseCode::NXDomain);
    }

    #[test]
    fn test_default_mode_hosts_rule_answers_rule_ip() {
        let synth = Synthesizer::new(&config(BlockingMode::Default));
        let answer = RewriteAnswer {
            cname: None,
            ipv4: vec!["0.0.0.0".parse().unwrap()],
            ipv6: vec![],
        };
        let reply = synth.blocked("tracker.example", RecordType::A, Some(&answer));
        assert_eq!(reply.code, ResponseCode::NoError);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].data().to_string(), "0.0.0.0");
        assert_eq!(reply.answers[0].ttl(), 10);
    }

    #[test]
    fn test_rewrite_chain_records() {
        let synth = Synthesizer::new(&config(BlockingMode::Default));
        let answer = RewriteAnswer {
            cname: Some("host.com".to_string()),
            ipv4: vec!["1.2.3.4".parse().unwrap()],
            ipv6: vec![],
        };
        let reply = synth.rewrite(
            "sub.host.com",
            RecordType::A,
            &["host.com".to_string()],
            &answer,
        );
        assert_eq!(reply.answers.len(), 2);
        assert_eq!(reply.answers[0].record_type().to_string(), "CNAME");
        assert_eq!(reply.answers[0].name().to_string(), "sub.host.com.");
        assert_eq!(reply.answers[1].record_type().to_string(), "A");
        assert_eq!(reply.answers[1].name().to_string(), "host.com.");
    }

    #[test]
    fn test_aaaa_rewrite_with_only_v4_is_empty_noerror() {
        let synth = Synthesizer::new(&config(BlockingMode::Default));
        let answer = RewriteAnswer {
            cname: None,
            ipv4: vec!["1.2.3.4".parse().unwrap()],
            ipv6: vec![],
        };
        let reply = synth.rewrite("host.com", RecordType::AAAA, &[], &answer);
        assert_eq!(reply.code, ResponseCode::NoError);
        assert!(reply.answers.is_empty());
    }
}
