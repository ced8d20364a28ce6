use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};
use warden_dns_domain::{RecordType, RewriteAnswer, RewriteEntry, RewriteTarget};

/// Maximum CNAME hops a rewrite chain may take before falling back to
/// upstream.
const MAX_CHAIN_DEPTH: usize = 8;

/// Result of consulting the rewrite table for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No entry applies.
    None,
    /// An exception entry or an aborted chain: resolve upstream as usual.
    Passthrough,
    /// A type-scoped literal (`A`/`AAAA`) covers this qtype: forward it.
    TypePassthrough,
    /// Fully synthesized local answer. `chain` lists the CNAME hops taken,
    /// in order, excluding the question name itself.
    Answer {
        chain: Vec<String>,
        answer: RewriteAnswer,
    },
    /// The chain left the local table; forward `target` upstream and graft
    /// the answer onto `chain`.
    CnameUpstream {
        chain: Vec<String>,
        target: String,
    },
}

/// Static name resolution: configured rewrites merged with `/etc/hosts`.
///
/// Immutable after construction; rebuilt and swapped with the rest of the
/// filtering state.
pub struct HostsResolver {
    exact: FxHashMap<String, Vec<RewriteTarget>>,
    /// `(suffix, targets)` for `*.suffix` entries, most specific first.
    wildcards: Vec<(String, Vec<RewriteTarget>)>,
    /// Addresses from `/etc/hosts`, keyed by name.
    hosts_v4: FxHashMap<String, Vec<std::net::Ipv4Addr>>,
    hosts_v6: FxHashMap<String, Vec<std::net::Ipv6Addr>>,
    /// Reverse index for PTR answers.
    reverse: FxHashMap<IpAddr, Vec<String>>,
}

impl HostsResolver {
    pub fn new(rewrites: &[RewriteEntry], etc_hosts: &str) -> Self {
        let mut exact: FxHashMap<String, Vec<RewriteTarget>> = FxHashMap::default();
        let mut wildcards: FxHashMap<String, Vec<RewriteTarget>> = FxHashMap::default();

        for entry in rewrites {
            let target = match entry.target() {
                Ok(t) => t,
                Err(e) => {
                    warn!(domain = %entry.domain, error = %e, "Skipping invalid rewrite entry");
                    continue;
                }
            };
            if let Some(suffix) = entry.domain.strip_prefix("*.") {
                wildcards.entry(suffix.to_string()).or_default().push(target);
            } else {
                exact.entry(entry.domain.clone()).or_default().push(target);
            }
        }

        let mut wildcards: Vec<(String, Vec<RewriteTarget>)> = wildcards.into_iter().collect();
        wildcards.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        let mut hosts_v4: FxHashMap<String, Vec<std::net::Ipv4Addr>> = FxHashMap::default();
        let mut hosts_v6: FxHashMap<String, Vec<std::net::Ipv6Addr>> = FxHashMap::default();
        let mut reverse: FxHashMap<IpAddr, Vec<String>> = FxHashMap::default();

        for line in etc_hosts.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next() else { continue };
            let Ok(ip) = addr.parse::<IpAddr>() else {
                continue;
            };
            for name in fields {
                let name = name.to_ascii_lowercase();
                match ip {
                    IpAddr::V4(v4) => hosts_v4.entry(name.clone()).or_default().push(v4),
                    IpAddr::V6(v6) => hosts_v6.entry(name.clone()).or_default().push(v6),
                }
                let names = reverse.entry(ip).or_default();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        debug!(
            rewrites = exact.len(),
            wildcards = wildcards.len(),
            hosts_names = hosts_v4.len() + hosts_v6.len(),
            "Hosts resolver built"
        );

        Self {
            exact,
            wildcards,
            hosts_v4,
            hosts_v6,
            reverse,
        }
    }

    pub fn from_system(rewrites: &[RewriteEntry]) -> Self {
        let etc_hosts = std::fs::read_to_string(Path::new("/etc/hosts")).unwrap_or_default();
        Self::new(rewrites, &etc_hosts)
    }

    /// All configured rewrite targets whose pattern covers `host`.
    /// Exact entries shadow wildcard entries entirely.
    fn targets_for(&self, host: &str) -> Option<&[RewriteTarget]> {
        if let Some(targets) = self.exact.get(host) {
            return Some(targets);
        }
        for (suffix, targets) in &self.wildcards {
            if host.len() > suffix.len() + 1
                && host.ends_with(suffix.as_str())
                && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
            {
                return Some(targets);
            }
        }
        None
    }

    /// Resolve `host`/`qtype` against the rewrite table and `/etc/hosts`.
    pub fn resolve(&self, host: &str, qtype: RecordType) -> RewriteOutcome {
        // Configured rewrites take priority over /etc/hosts content.
        if let Some(first) = self.targets_for(host) {
            return self.walk_chain(host, first, qtype);
        }

        if qtype == RecordType::A || qtype == RecordType::AAAA {
            let v4 = self.hosts_v4.get(host);
            let v6 = self.hosts_v6.get(host);
            if v4.is_some() || v6.is_some() {
                let mut answer = RewriteAnswer::default();
                if qtype == RecordType::A {
                    answer.ipv4 = v4.cloned().unwrap_or_default();
                } else {
                    answer.ipv6 = v6.cloned().unwrap_or_default();
                }
                return RewriteOutcome::Answer {
                    chain: Vec::new(),
                    answer,
                };
            }
        }

        RewriteOutcome::None
    }

    fn walk_chain(
        &self,
        origin: &str,
        first_targets: &[RewriteTarget],
        qtype: RecordType,
    ) -> RewriteOutcome {
        let mut chain: Vec<String> = Vec::new();
        let mut answer = RewriteAnswer::default();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(origin.to_string());

        let mut targets = first_targets;
        loop {
            let mut next_name: Option<String> = None;
            for target in targets {
                match target {
                    RewriteTarget::Exception => return RewriteOutcome::Passthrough,
                    RewriteTarget::PassthroughA if qtype == RecordType::A => {
                        return RewriteOutcome::TypePassthrough;
                    }
                    RewriteTarget::PassthroughAaaa if qtype == RecordType::AAAA => {
                        return RewriteOutcome::TypePassthrough;
                    }
                    RewriteTarget::PassthroughA | RewriteTarget::PassthroughAaaa => {}
                    RewriteTarget::Ipv4(ip) => answer.ipv4.push(*ip),
                    RewriteTarget::Ipv6(ip) => answer.ipv6.push(*ip),
                    RewriteTarget::Cname(name) => {
                        // Multiple CNAME targets merge into one chain; the
                        // first one drives the walk.
                        if next_name.is_none() {
                            next_name = Some(name.clone());
                        }
                    }
                }
            }

            let Some(name) = next_name else {
                answer.cname = chain.first().cloned();
                return RewriteOutcome::Answer { chain, answer };
            };

            if chain.len() >= MAX_CHAIN_DEPTH || !visited.insert(name.clone()) {
                debug!(host = origin, "Rewrite chain too deep or cyclic; falling back to upstream");
                return RewriteOutcome::Passthrough;
            }
            chain.push(name.clone());

            match self.targets_for(&name) {
                Some(next_targets) => targets = next_targets,
                None => {
                    // Local /etc/hosts data can terminate the chain too.
                    if let Some(v4) = self.hosts_v4.get(&name) {
                        if qtype == RecordType::A {
                            answer.ipv4.extend(v4.iter().copied());
                        }
                    }
                    if let Some(v6) = self.hosts_v6.get(&name) {
                        if qtype == RecordType::AAAA {
                            answer.ipv6.extend(v6.iter().copied());
                        }
                    }
                    if self.hosts_v4.contains_key(&name) || self.hosts_v6.contains_key(&name) {
                        answer.cname = chain.first().cloned();
                        return RewriteOutcome::Answer { chain, answer };
                    }
                    return RewriteOutcome::CnameUpstream {
                        chain,
                        target: name,
                    };
                }
            }
        }
    }

    /// Names for a reverse (PTR) question, from `/etc/hosts`.
    pub fn resolve_ptr(&self, ip: IpAddr) -> Option<&[String]> {
        self.reverse.get(&ip).map(|v| v.as_slice())
    }

    /// Forward lookup used by the client registry.
    pub fn name_for_ip(&self, ip: IpAddr) -> Option<&str> {
        self.reverse.get(&ip).and_then(|v| v.first()).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(domain: &str, answer: &str) -> RewriteEntry {
        RewriteEntry::new(domain, answer)
    }

    #[test]
    fn test_simple_address_rewrite() {
        let resolver = HostsResolver::new(&[rw("host.example", "1.2.3.4")], "");
        match resolver.resolve("host.example", RecordType::A) {
            RewriteOutcome::Answer { chain, answer } => {
                assert!(chain.is_empty());
                assert_eq!(answer.ipv4, vec!["1.2.3.4".parse::<std::net::Ipv4Addr>().unwrap()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_aaaa_on_ipv4_only_rewrite_is_empty_answer() {
        let resolver = HostsResolver::new(&[rw("host.example", "1.2.3.4")], "");
        match resolver.resolve("host.example", RecordType::AAAA) {
            RewriteOutcome::Answer { answer, .. } => {
                assert!(answer.ipv4.is_empty() || answer.ipv6.is_empty());
                assert!(answer.ipv6.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cname_chain_resolves_locally() {
        let resolver = HostsResolver::new(
            &[rw("sub.host.com", "host.com"), rw("host.com", "1.2.3.4")],
            "",
        );
        match resolver.resolve("sub.host.com", RecordType::A) {
            RewriteOutcome::Answer { chain, answer } => {
                assert_eq!(chain, vec!["host.com".to_string()]);
                assert_eq!(answer.cname.as_deref(), Some("host.com"));
                assert_eq!(answer.ipv4, vec!["1.2.3.4".parse::<std::net::Ipv4Addr>().unwrap()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cname_to_unknown_name_goes_upstream() {
        let resolver = HostsResolver::new(&[rw("alias.example", "real.example")], "");
        match resolver.resolve("alias.example", RecordType::A) {
            RewriteOutcome::CnameUpstream { chain, target } => {
                assert_eq!(chain, vec!["real.example".to_string()]);
                assert_eq!(target, "real.example");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cycle_aborts_to_upstream() {
        let resolver =
            HostsResolver::new(&[rw("a.example", "b.example"), rw("b.example", "a.example")], "");
        assert_eq!(
            resolver.resolve("a.example", RecordType::A),
            RewriteOutcome::Passthrough
        );
    }

    #[test]
    fn test_exception_passthrough() {
        let resolver = HostsResolver::new(
            &[rw("*.host.example", "1.2.3.4"), rw("keep.host.example", "keep.host.example")],
            "",
        );
        assert_eq!(
            resolver.resolve("keep.host.example", RecordType::A),
            RewriteOutcome::Passthrough
        );
        assert!(matches!(
            resolver.resolve("other.host.example", RecordType::A),
            RewriteOutcome::Answer { .. }
        ));
    }

    #[test]
    fn test_type_scoped_passthrough() {
        let resolver = HostsResolver::new(
            &[rw("host.example", "A"), rw("host.example", "::1")],
            "",
        );
        assert_eq!(
            resolver.resolve("host.example", RecordType::A),
            RewriteOutcome::TypePassthrough
        );
        match resolver.resolve("host.example", RecordType::AAAA) {
            RewriteOutcome::Answer { answer, .. } => {
                assert_eq!(answer.ipv6, vec!["::1".parse::<std::net::Ipv6Addr>().unwrap()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_etc_hosts_and_ptr() {
        let hosts = "192.168.1.10 nas.lan nas # storage\n127.0.0.1 localhost\n";
        let resolver = HostsResolver::new(&[], hosts);
        match resolver.resolve("nas.lan", RecordType::A) {
            RewriteOutcome::Answer { answer, .. } => {
                assert_eq!(answer.ipv4, vec!["192.168.1.10".parse::<std::net::Ipv4Addr>().unwrap()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let names = resolver.resolve_ptr("192.168.1.10".parse().unwrap()).unwrap();
        assert_eq!(names, ["nas.lan".to_string(), "nas".to_string()]);
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let resolver = HostsResolver::new(
            &[rw("*.host.example", "1.1.1.1"), rw("a.host.example", "2.2.2.2")],
            "",
        );
        match resolver.resolve("a.host.example", RecordType::A) {
            RewriteOutcome::Answer { answer, .. } => {
                assert_eq!(answer.ipv4, vec!["2.2.2.2".parse::<std::net::Ipv4Addr>().unwrap()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
