use crate::errors::WardenError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// One configured rewrite: a name pattern and a textual answer target.
///
/// The pattern is an exact host or a `*.host` wildcard. The target is an
/// IPv4/IPv6 address, a CNAME hostname, the literal `A` or `AAAA`
/// (type-scoped passthrough to upstream), or the pattern itself (an
/// exception that always goes to upstream).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RewriteEntry {
    pub domain: String,
    pub answer: String,
}

/// Parsed form of [`RewriteEntry::answer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteTarget {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Cname(String),
    /// Forward only A questions to upstream; answer everything else locally.
    PassthroughA,
    /// Forward only AAAA questions to upstream.
    PassthroughAaaa,
    /// The target equals the pattern: the name is exempt from rewriting.
    Exception,
}

impl RewriteEntry {
    pub fn new(domain: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
            answer: answer.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.domain.starts_with("*.")
    }

    /// Whether this entry's pattern covers `host`. Exact patterns match the
    /// host itself; `*.base` matches strict subdomains of `base` only.
    pub fn matches(&self, host: &str) -> bool {
        if let Some(base) = self.domain.strip_prefix("*.") {
            host.len() > base.len() + 1
                && host.ends_with(base)
                && host.as_bytes()[host.len() - base.len() - 1] == b'.'
        } else {
            host == self.domain
        }
    }

    pub fn target(&self) -> Result<RewriteTarget, WardenError> {
        let answer = self.answer.trim();
        if answer.is_empty() {
            return Err(WardenError::InvalidRewrite(
                self.domain.clone(),
                "empty answer".into(),
            ));
        }
        if answer.eq_ignore_ascii_case(&self.domain) {
            return Ok(RewriteTarget::Exception);
        }
        match answer {
            "A" => return Ok(RewriteTarget::PassthroughA),
            "AAAA" => return Ok(RewriteTarget::PassthroughAaaa),
            _ => {}
        }
        if let Ok(v4) = answer.parse::<Ipv4Addr>() {
            return Ok(RewriteTarget::Ipv4(v4));
        }
        if let Ok(v6) = answer.parse::<Ipv6Addr>() {
            return Ok(RewriteTarget::Ipv6(v6));
        }
        Ok(RewriteTarget::Cname(answer.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let e = RewriteEntry::new("host.example", "1.2.3.4");
        assert!(e.matches("host.example"));
        assert!(!e.matches("sub.host.example"));
    }

    #[test]
    fn test_wildcard_matches_subdomains_only() {
        let e = RewriteEntry::new("*.host.example", "1.2.3.4");
        assert!(!e.matches("host.example"));
        assert!(e.matches("a.host.example"));
        assert!(e.matches("a.b.host.example"));
        assert!(!e.matches("otherhost.example"));
        assert!(!e.matches("xhost.example"));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            RewriteEntry::new("h.example", "1.2.3.4").target().unwrap(),
            RewriteTarget::Ipv4(Ipv4Addr::new(1, 2, 3, 4))
        );
        assert_eq!(
            RewriteEntry::new("h.example", "::1").target().unwrap(),
            RewriteTarget::Ipv6("::1".parse().unwrap())
        );
        assert_eq!(
            RewriteEntry::new("h.example", "other.example").target().unwrap(),
            RewriteTarget::Cname("other.example".into())
        );
        assert_eq!(
            RewriteEntry::new("h.example", "A").target().unwrap(),
            RewriteTarget::PassthroughA
        );
        assert_eq!(
            RewriteEntry::new("h.example", "h.example").target().unwrap(),
            RewriteTarget::Exception
        );
    }
}
