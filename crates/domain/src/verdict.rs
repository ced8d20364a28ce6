use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Synthesized answer data carried by rewrite-style verdicts.
///
/// A rewrite may carry a CNAME, addresses, or both (a chain that was
/// resolved down to addresses keeps the intermediate CNAME for the answer
/// section).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteAnswer {
    pub cname: Option<String>,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl RewriteAnswer {
    pub fn is_empty(&self) -> bool {
        self.cname.is_none() && self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

/// Outcome of the decision pipeline for a single question.
///
/// The ordering rules of the pipeline live in the server; this type only
/// records which stage produced the terminal decision and with what data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    /// No rule matched anywhere.
    NotFiltered,
    /// An allow (`@@`) rule matched; upstream resolution still happens but
    /// all later blockers are skipped.
    Allowed { list_id: i64, rule: Arc<str> },
    /// A block rule matched.
    BlockedByRule { list_id: i64, rule: Arc<str> },
    BlockedBySafeBrowsing,
    BlockedByParental,
    /// A blocked-services bundle matched.
    BlockedByService { service: Arc<str> },
    /// A safe-search engine rewrite applies.
    SafeSearch { answer: RewriteAnswer },
    /// A hosts/rewrite entry or hosts-style rule produced a synthetic
    /// answer. `list_id`/`rule` are set when a hosts-style filter rule
    /// (rather than a configured rewrite) was the origin.
    Rewritten {
        answer: RewriteAnswer,
        list_id: Option<i64>,
        rule: Option<Arc<str>>,
    },
}

impl FilterVerdict {
    /// True for every verdict that suppresses the normal upstream answer.
    pub fn is_filtered(&self) -> bool {
        !matches!(self, FilterVerdict::NotFiltered | FilterVerdict::Allowed { .. })
    }

    /// True for verdicts that synthesize a blocked reply.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            FilterVerdict::BlockedByRule { .. }
                | FilterVerdict::BlockedBySafeBrowsing
                | FilterVerdict::BlockedByParental
                | FilterVerdict::BlockedByService { .. }
        )
    }

    pub fn reason(&self) -> FilterReason {
        match self {
            FilterVerdict::NotFiltered => FilterReason::NotFiltered,
            FilterVerdict::Allowed { .. } => FilterReason::NotFilteredAllowed,
            FilterVerdict::BlockedByRule { .. } => FilterReason::FilteredBlockList,
            FilterVerdict::BlockedBySafeBrowsing => FilterReason::FilteredSafeBrowsing,
            FilterVerdict::BlockedByParental => FilterReason::FilteredParental,
            FilterVerdict::BlockedByService { .. } => FilterReason::FilteredBlockedService,
            FilterVerdict::SafeSearch { .. } => FilterReason::FilteredSafeSearch,
            FilterVerdict::Rewritten { .. } => FilterReason::Rewritten,
        }
    }

    pub fn rule_text(&self) -> Option<&str> {
        match self {
            FilterVerdict::Allowed { rule, .. } | FilterVerdict::BlockedByRule { rule, .. } => {
                Some(rule)
            }
            FilterVerdict::Rewritten { rule, .. } => rule.as_deref(),
            _ => None,
        }
    }

    pub fn list_id(&self) -> Option<i64> {
        match self {
            FilterVerdict::Allowed { list_id, .. }
            | FilterVerdict::BlockedByRule { list_id, .. } => Some(*list_id),
            FilterVerdict::Rewritten { list_id, .. } => *list_id,
            _ => None,
        }
    }
}

/// Stable integer reason codes persisted in query-log lines.
///
/// The numeric values are part of the on-disk format; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FilterReason {
    NotFiltered = 0,
    NotFilteredAllowed = 1,
    NotFilteredError = 2,
    FilteredBlockList = 3,
    FilteredSafeBrowsing = 4,
    FilteredParental = 5,
    FilteredInvalid = 6,
    FilteredSafeSearch = 7,
    FilteredBlockedService = 8,
    Rewritten = 9,
}

impl FilterReason {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => FilterReason::NotFiltered,
            1 => FilterReason::NotFilteredAllowed,
            2 => FilterReason::NotFilteredError,
            3 => FilterReason::FilteredBlockList,
            4 => FilterReason::FilteredSafeBrowsing,
            5 => FilterReason::FilteredParental,
            6 => FilterReason::FilteredInvalid,
            7 => FilterReason::FilteredSafeSearch,
            8 => FilterReason::FilteredBlockedService,
            9 => FilterReason::Rewritten,
            _ => return None,
        })
    }

    /// Any reason that counts as "filtered" in search predicates and stats.
    pub fn is_filtered(self) -> bool {
        !matches!(
            self,
            FilterReason::NotFiltered
                | FilterReason::NotFilteredAllowed
                | FilterReason::NotFilteredError
        )
    }

    /// Reasons produced by a block (rule or service), as opposed to rewrites.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            FilterReason::FilteredBlockList | FilterReason::FilteredBlockedService
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(FilterReason::NotFiltered.code(), 0);
        assert_eq!(FilterReason::FilteredBlockList.code(), 3);
        assert_eq!(FilterReason::FilteredSafeSearch.code(), 7);
        assert_eq!(FilterReason::Rewritten.code(), 9);
    }

    #[test]
    fn test_reason_roundtrip() {
        for code in 0..=9 {
            let reason = FilterReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert!(FilterReason::from_code(10).is_none());
    }

    #[test]
    fn test_verdict_classification() {
        let blocked = FilterVerdict::BlockedByRule {
            list_id: 3,
            rule: Arc::from("||ads.example.^"),
        };
        assert!(blocked.is_filtered());
        assert!(blocked.is_blocking());

        let allowed = FilterVerdict::Allowed {
            list_id: 0,
            rule: Arc::from("@@||good.example.^"),
        };
        assert!(!allowed.is_filtered());
        assert!(!allowed.is_blocking());

        let rewrite = FilterVerdict::Rewritten {
            answer: RewriteAnswer {
                cname: None,
                ipv4: vec![Ipv4Addr::new(1, 2, 3, 4)],
                ipv6: vec![],
            },
            list_id: None,
            rule: None,
        };
        assert!(rewrite.is_filtered());
        assert!(!rewrite.is_blocking());
    }
}
