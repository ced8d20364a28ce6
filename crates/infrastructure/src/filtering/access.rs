use std::net::IpAddr;
use tracing::warn;
use warden_dns_domain::{AccessConfig, SubnetMatcher};

/// What the gate decided for a source/host pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Drop without a reply.
    DropClient,
    /// The question name is on the blocked-hosts list.
    BlockHost,
}

/// Per-client allow/deny plus global blocked-host wildcards.
///
/// Evaluated before anything else so hostile traffic never reaches the
/// expensive path.
pub struct AccessGate {
    allowed: SubnetMatcher<()>,
    disallowed: SubnetMatcher<()>,
    blocked_exact: Vec<String>,
    blocked_wildcards: Vec<String>,
}

impl AccessGate {
    pub fn new(config: &AccessConfig) -> Self {
        let mut allowed = SubnetMatcher::new();
        for spec in &config.allowed_clients {
            if let Err(e) = allowed.insert(spec, ()) {
                warn!(spec = %spec, error = %e, "Ignoring invalid allowed_clients entry");
            }
        }
        let mut disallowed = SubnetMatcher::new();
        for spec in &config.disallowed_clients {
            if let Err(e) = disallowed.insert(spec, ()) {
                warn!(spec = %spec, error = %e, "Ignoring invalid disallowed_clients entry");
            }
        }

        let mut blocked_exact = Vec::new();
        let mut blocked_wildcards = Vec::new();
        for host in &config.blocked_hosts {
            let host = host.trim().to_ascii_lowercase();
            if host.is_empty() {
                continue;
            }
            match host.strip_prefix("*.") {
                Some(suffix) => blocked_wildcards.push(suffix.to_string()),
                None => blocked_exact.push(host),
            }
        }

        Self {
            allowed,
            disallowed,
            blocked_exact,
            blocked_wildcards,
        }
    }

    pub fn check_client(&self, ip: IpAddr) -> AccessDecision {
        // Whitelist mode: a non-empty allow list denies everyone else.
        if !self.allowed.is_empty() {
            if self.allowed.contains(ip) {
                return AccessDecision::Allow;
            }
            return AccessDecision::DropClient;
        }
        if self.disallowed.contains(ip) {
            return AccessDecision::DropClient;
        }
        AccessDecision::Allow
    }

    pub fn check_host(&self, host: &str) -> AccessDecision {
        if self.blocked_exact.iter().any(|h| h == host) {
            return AccessDecision::BlockHost;
        }
        for suffix in &self.blocked_wildcards {
            if host == suffix
                || (host.len() > suffix.len() + 1
                    && host.ends_with(suffix.as_str())
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            {
                return AccessDecision::BlockHost;
            }
        }
        AccessDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allowed: &[&str], disallowed: &[&str], blocked: &[&str]) -> AccessConfig {
        AccessConfig {
            allowed_clients: allowed.iter().map(|s| s.to_string()).collect(),
            disallowed_clients: disallowed.iter().map(|s| s.to_string()).collect(),
            blocked_hosts: blocked.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_whitelist_mode() {
        let gate = AccessGate::new(&config(&["192.168.1.0/24"], &[], &[]));
        assert_eq!(gate.check_client("192.168.1.5".parse().unwrap()), AccessDecision::Allow);
        assert_eq!(gate.check_client("10.0.0.1".parse().unwrap()), AccessDecision::DropClient);
    }

    #[test]
    fn test_denylist_mode() {
        let gate = AccessGate::new(&config(&[], &["10.0.0.0/8"], &[]));
        assert_eq!(gate.check_client("10.1.1.1".parse().unwrap()), AccessDecision::DropClient);
        assert_eq!(gate.check_client("192.168.1.5".parse().unwrap()), AccessDecision::Allow);
    }

    #[test]
    fn test_blocked_hosts() {
        let gate = AccessGate::new(&config(&[], &[], &["bad.example", "*.ads.example"]));
        assert_eq!(gate.check_host("bad.example"), AccessDecision::BlockHost);
        assert_eq!(gate.check_host("x.ads.example"), AccessDecision::BlockHost);
        assert_eq!(gate.check_host("ads.example"), AccessDecision::BlockHost);
        assert_eq!(gate.check_host("good.example"), AccessDecision::Allow);
    }
}
