use super::rules::{domain_suffixes, parse_rule_line, FilterRule, RuleKind};
use aho_corasick::AhoCorasick;
use compact_str::CompactString;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::net::IpAddr;
use warden_dns_domain::RecordType;

/// A match candidate inside one rule set.
#[derive(Debug, Clone, Copy)]
pub struct RuleHit<'a> {
    pub rule: &'a FilterRule,
    /// Hosts-rule address, when the hit came from a hosts-file line.
    pub hosts_ip: Option<IpAddr>,
}

/// One filter list compiled for lookup.
///
/// Immutable after `compile`; the store swaps whole sets atomically, so no
/// interior mutation is ever needed.
pub struct RuleSet {
    rules: Vec<FilterRule>,
    /// `||host^` rules indexed by the anchored host.
    domain_index: FxHashMap<CompactString, SmallVec<[usize; 1]>>,
    /// Plain `host` rules, exact-name only.
    exact_index: FxHashMap<CompactString, SmallVec<[usize; 1]>>,
    /// `*.suffix` rules indexed by suffix.
    wildcard_index: FxHashMap<CompactString, SmallVec<[usize; 1]>>,
    /// Hosts-file rules indexed by name.
    hosts_index: FxHashMap<CompactString, SmallVec<[usize; 2]>>,
    /// `/pattern/` rules without regex metacharacters, folded into one
    /// automaton. The vec maps automaton pattern ids back to rules.
    substring_rules: Option<(AhoCorasick, Vec<usize>)>,
    /// True regexes, scanned linearly.
    regex_rules: Vec<usize>,
}

impl RuleSet {
    /// Compile a rule text into an indexed set. Unparseable lines are
    /// skipped; the surviving count is [`RuleSet::len`].
    pub fn compile(text: &str) -> Self {
        let mut rules = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if let Some(rule) = parse_rule_line(line, line_no) {
                rules.push(rule);
            }
        }
        Self::from_rules(rules)
    }

    /// Compile from an explicit rule sequence (user rules, service bundles).
    pub fn compile_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for (line_no, line) in lines.into_iter().enumerate() {
            if let Some(rule) = parse_rule_line(line.as_ref(), line_no) {
                rules.push(rule);
            }
        }
        Self::from_rules(rules)
    }

    fn from_rules(rules: Vec<FilterRule>) -> Self {
        let mut domain_index: FxHashMap<CompactString, SmallVec<[usize; 1]>> =
            FxHashMap::default();
        let mut exact_index: FxHashMap<CompactString, SmallVec<[usize; 1]>> =
            FxHashMap::default();
        let mut wildcard_index: FxHashMap<CompactString, SmallVec<[usize; 1]>> =
            FxHashMap::default();
        let mut hosts_index: FxHashMap<CompactString, SmallVec<[usize; 2]>> =
            FxHashMap::default();
        let mut regex_rules = Vec::new();
        let mut literal_patterns: Vec<(String, usize)> = Vec::new();

        for (idx, rule) in rules.iter().enumerate() {
            match &rule.kind {
                RuleKind::Domain { host } => {
                    domain_index
                        .entry(CompactString::new(host))
                        .or_default()
                        .push(idx);
                }
                RuleKind::Exact { host } => {
                    exact_index
                        .entry(CompactString::new(host))
                        .or_default()
                        .push(idx);
                }
                RuleKind::Wildcard { suffix } => {
                    wildcard_index
                        .entry(CompactString::new(suffix))
                        .or_default()
                        .push(idx);
                }
                RuleKind::Hosts { host, .. } => {
                    hosts_index
                        .entry(CompactString::new(host))
                        .or_default()
                        .push(idx);
                }
                RuleKind::Regex { pattern } => {
                    let source = pattern.as_str();
                    if is_plain_substring(source) {
                        literal_patterns.push((source.to_ascii_lowercase(), idx));
                    } else {
                        regex_rules.push(idx);
                    }
                }
            }
        }

        let substring_rules = if literal_patterns.is_empty() {
            None
        } else {
            let (patterns, indices): (Vec<String>, Vec<usize>) =
                literal_patterns.into_iter().unzip();
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
                .ok()
                .map(|ac| (ac, indices))
        };

        Self {
            rules,
            domain_index,
            exact_index,
            wildcard_index,
            hosts_index,
            substring_rules,
            regex_rules,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Ordered rule text sequence; used by the manager to detect whether a
    /// freshly fetched list actually changed.
    pub fn rule_texts(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| &*r.text)
    }

    /// Collect every rule matching `host` for `qtype`, in rule order.
    pub fn matches<'a>(
        &'a self,
        host: &str,
        qtype: RecordType,
        client_tags: &[String],
    ) -> Vec<RuleHit<'a>> {
        let mut hits: Vec<RuleHit<'a>> = Vec::new();
        let mut push = |idx: usize, hosts_ip: Option<IpAddr>| {
            let rule = &self.rules[idx];
            if rule.applies(qtype, client_tags) {
                hits.push(RuleHit { rule, hosts_ip });
            }
        };

        // `||host^` covers the host itself and all parents walked up.
        for suffix in domain_suffixes(host) {
            if let Some(indices) = self.domain_index.get(suffix) {
                for &idx in indices {
                    push(idx, None);
                }
            }
            // `*.suffix` requires at least one extra label.
            if suffix.len() < host.len() {
                if let Some(indices) = self.wildcard_index.get(suffix) {
                    for &idx in indices {
                        push(idx, None);
                    }
                }
            }
        }

        if let Some(indices) = self.exact_index.get(host) {
            for &idx in indices {
                push(idx, None);
            }
        }

        if let Some(indices) = self.hosts_index.get(host) {
            for &idx in indices {
                let ip = match &self.rules[idx].kind {
                    RuleKind::Hosts { ip, .. } => Some(*ip),
                    _ => None,
                };
                push(idx, ip);
            }
        }

        if let Some((automaton, indices)) = &self.substring_rules {
            let mut matched: SmallVec<[usize; 4]> = SmallVec::new();
            for hit in automaton.find_iter(host) {
                let idx = indices[hit.pattern().as_usize()];
                if !matched.contains(&idx) {
                    matched.push(idx);
                }
            }
            for idx in matched {
                push(idx, None);
            }
        }

        for &idx in &self.regex_rules {
            if let RuleKind::Regex { pattern } = &self.rules[idx].kind {
                if pattern.is_match(host).unwrap_or(false) {
                    push(idx, None);
                }
            }
        }

        hits.sort_by_key(|hit| hit.rule.index);
        hits
    }
}

/// A pattern with no regex metacharacters matches as a raw substring and
/// can live in the shared automaton instead of the regex scan.
fn is_plain_substring(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|c| matches!(c, '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\'))
}
