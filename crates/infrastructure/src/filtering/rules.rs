use smallvec::SmallVec;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use warden_dns_domain::RecordType;

/// Shape of one compiled rule.
#[derive(Debug)]
pub enum RuleKind {
    /// `||host^`: the host and everything under it.
    Domain { host: String },
    /// Plain `host` token: the host only.
    Exact { host: String },
    /// `*.suffix`: strict subdomains of `suffix`.
    Wildcard { suffix: String },
    /// `/pattern/`: regular expression over the whole name.
    Regex { pattern: fancy_regex::Regex },
    /// `ip host` hosts-file line.
    Hosts { ip: IpAddr, host: String },
}

/// One parsed filter rule with its modifiers.
#[derive(Debug)]
pub struct FilterRule {
    /// Original rule text, kept verbatim for verdicts and the log.
    pub text: Arc<str>,
    /// Position within the source list; the tie-breaker among blockers.
    pub index: usize,
    pub allow: bool,
    pub important: bool,
    /// `$ctag=` values; empty means the rule applies to every client.
    pub client_tags: SmallVec<[String; 2]>,
    /// `$dnstype=` values; empty means every question type.
    pub dns_types: SmallVec<[RecordType; 2]>,
    pub kind: RuleKind,
}

impl FilterRule {
    /// Whether the rule's modifiers admit this question.
    pub fn applies(&self, qtype: RecordType, client_tags: &[String]) -> bool {
        if !self.dns_types.is_empty() && !self.dns_types.contains(&qtype) {
            return false;
        }
        if !self.client_tags.is_empty()
            && !self.client_tags.iter().any(|t| client_tags.contains(t))
        {
            return false;
        }
        true
    }
}

/// Parse one line of a filter list. Returns `None` for comments, empty
/// lines, and lines the engine cannot express.
pub fn parse_rule_line(line: &str, index: usize) -> Option<FilterRule> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('!') || trimmed.starts_with('#') {
        return None;
    }

    let text: Arc<str> = Arc::from(trimmed);
    let (allow, body) = match trimmed.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    // Hosts-file form: "addr host [aliases…]".
    let mut fields = body.split_whitespace();
    if let (Some(first), Some(second)) = (fields.next(), fields.next()) {
        if let Ok(ip) = first.parse::<IpAddr>() {
            let host = second.to_ascii_lowercase();
            if is_ignored_hosts_name(&host) || !host.contains('.') {
                return None;
            }
            return Some(FilterRule {
                text,
                index,
                allow,
                important: false,
                client_tags: SmallVec::new(),
                dns_types: SmallVec::new(),
                kind: RuleKind::Hosts { ip, host },
            });
        }
    }

    // Split off `$modifier,modifier…`.
    let (pattern, modifiers) = match body.rsplit_once('$') {
        // A '$' inside a regex body is not a modifier separator.
        Some((p, m)) if !body.starts_with('/') => (p, Some(m)),
        _ => (body, None),
    };

    let mut important = false;
    let mut client_tags: SmallVec<[String; 2]> = SmallVec::new();
    let mut dns_types: SmallVec<[RecordType; 2]> = SmallVec::new();
    if let Some(modifiers) = modifiers {
        for modifier in modifiers.split(',') {
            let modifier = modifier.trim();
            if modifier == "important" {
                important = true;
            } else if let Some(tags) = modifier.strip_prefix("ctag=") {
                client_tags.extend(tags.split('|').map(|t| t.to_string()));
            } else if let Some(types) = modifier.strip_prefix("dnstype=") {
                for t in types.split('|') {
                    match RecordType::from_str(t) {
                        Ok(rt) => dns_types.push(rt),
                        Err(_) => {
                            debug!(rule = %text, dnstype = t, "Skipping rule with unknown dnstype");
                            return None;
                        }
                    }
                }
            } else {
                // Unsupported modifier: matching it loosely would over- or
                // under-block, so the whole rule is dropped.
                debug!(rule = %text, modifier, "Skipping rule with unsupported modifier");
                return None;
            }
        }
    }

    let pattern = pattern.trim();
    let kind = if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let re = fancy_regex::Regex::new(&pattern[1..pattern.len() - 1]).ok()?;
        RuleKind::Regex { pattern: re }
    } else if let Some(anchored) = pattern.strip_prefix("||") {
        // FQDN-form rules keep a trailing dot before the separator; question
        // hosts are stored without it.
        let host = anchored
            .trim_end_matches('|')
            .trim_end_matches('^')
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }
        RuleKind::Domain { host }
    } else if let Some(suffix) = pattern.strip_prefix("*.") {
        if suffix.is_empty() {
            return None;
        }
        RuleKind::Wildcard {
            suffix: suffix.to_ascii_lowercase(),
        }
    } else {
        let host = pattern
            .trim_start_matches('|')
            .trim_end_matches('|')
            .trim_end_matches('^')
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if host.is_empty() || !host.contains('.') || host.contains('/') || host.contains('*') {
            return None;
        }
        RuleKind::Exact { host }
    };

    Some(FilterRule {
        text,
        index,
        allow,
        important,
        client_tags,
        dns_types,
        kind,
    })
}

fn is_ignored_hosts_name(host: &str) -> bool {
    matches!(
        host,
        "localhost" | "localhost.localdomain" | "broadcasthost" | "ip6-localhost" | "ip6-loopback"
    )
}

/// Iterate a host's own name and every parent suffix: `a.b.c` yields
/// `a.b.c`, `b.c`, `c`.
pub fn domain_suffixes(host: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(host), |current| {
        current.split_once('.').map(|(_, rest)| rest)
    })
}
