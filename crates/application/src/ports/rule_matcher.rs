use warden_dns_domain::{FilterVerdict, RecordType};

/// Port for the compiled rule engine.
///
/// `match_host` is synchronous: the compiled state lives entirely in
/// memory and is swapped atomically by the filter manager, so callers never
/// observe a partially updated rule set. Any engine whose surface matches
/// this trait and supports O(1) swap of its compiled state can be plugged
/// in.
pub trait RuleMatcher: Send + Sync {
    /// Match a fully-qualified lower-case name against all active rules.
    ///
    /// Precedence: allow rules beat block rules (unless the block rule is
    /// `$important`); among blockers the smallest list ID wins, then the
    /// original rule order within the list.
    fn match_host(&self, host: &str, qtype: RecordType, client_tags: &[String]) -> FilterVerdict;

    /// Same matching, but allow rules are ignored. Used by the
    /// post-response re-check over CNAME targets and answer addresses.
    fn match_host_ignoring_allow(&self, host: &str, qtype: RecordType) -> FilterVerdict;
}
