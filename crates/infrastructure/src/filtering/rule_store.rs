use super::rule_set::{RuleHit, RuleSet};
use std::net::IpAddr;
use std::sync::Arc;
use warden_dns_application::ports::RuleMatcher;
use warden_dns_domain::{FilterVerdict, RecordType, RewriteAnswer};

/// Union of all active rule sets with the pipeline's precedence applied.
///
/// The store itself is immutable; the filter manager builds a new one on
/// every change and publishes it through the state snapshot.
pub struct RuleStore {
    /// `(list_id, set)` ordered by ascending list ID.
    sets: Vec<(i64, Arc<RuleSet>)>,
}

struct Candidate<'a> {
    list_id: i64,
    hit: RuleHit<'a>,
}

impl RuleStore {
    pub fn new(mut sets: Vec<(i64, Arc<RuleSet>)>) -> Self {
        sets.sort_by_key(|(id, _)| *id);
        Self { sets }
    }

    pub fn empty() -> Self {
        Self { sets: Vec::new() }
    }

    pub fn total_rules(&self) -> usize {
        self.sets.iter().map(|(_, set)| set.len()).sum()
    }

    fn best_match(
        &self,
        host: &str,
        qtype: RecordType,
        client_tags: &[String],
        honor_allow: bool,
    ) -> FilterVerdict {
        let mut best_allow: Option<Candidate<'_>> = None;
        let mut best_block: Option<Candidate<'_>> = None;
        let mut best_important: Option<Candidate<'_>> = None;

        for (list_id, set) in &self.sets {
            for hit in set.matches(host, qtype, client_tags) {
                let candidate = Candidate {
                    list_id: *list_id,
                    hit,
                };
                // Lists are walked smallest-ID first and hits arrive in rule
                // order, so the first candidate of each class wins.
                if hit.rule.allow {
                    if honor_allow && best_allow.is_none() {
                        best_allow = Some(candidate);
                    }
                } else if hit.rule.important {
                    if best_important.is_none() {
                        best_important = Some(candidate);
                    }
                } else if best_block.is_none() {
                    best_block = Some(candidate);
                }
            }
        }

        if let Some(important) = best_important {
            return Self::block_verdict(important);
        }
        if let Some(allow) = best_allow {
            return FilterVerdict::Allowed {
                list_id: allow.list_id,
                rule: Arc::clone(&allow.hit.rule.text),
            };
        }
        match best_block {
            Some(block) => Self::block_verdict(block),
            None => FilterVerdict::NotFiltered,
        }
    }

    fn block_verdict(candidate: Candidate<'_>) -> FilterVerdict {
        match candidate.hit.hosts_ip {
            // Hosts-style rules rewrite to the rule's address.
            Some(ip) => {
                let mut answer = RewriteAnswer::default();
                match ip {
                    IpAddr::V4(v4) => answer.ipv4.push(v4),
                    IpAddr::V6(v6) => answer.ipv6.push(v6),
                }
                FilterVerdict::Rewritten {
                    answer,
                    list_id: Some(candidate.list_id),
                    rule: Some(Arc::clone(&candidate.hit.rule.text)),
                }
            }
            None => FilterVerdict::BlockedByRule {
                list_id: candidate.list_id,
                rule: Arc::clone(&candidate.hit.rule.text),
            },
        }
    }
}

impl RuleMatcher for RuleStore {
    fn match_host(&self, host: &str, qtype: RecordType, client_tags: &[String]) -> FilterVerdict {
        self.best_match(host, qtype, client_tags, true)
    }

    fn match_host_ignoring_allow(&self, host: &str, qtype: RecordType) -> FilterVerdict {
        self.best_match(host, qtype, &[], false)
    }
}
