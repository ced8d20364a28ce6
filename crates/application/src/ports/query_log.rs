use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use warden_dns_domain::{ClientProtocol, DnsQuestion, FilterReason, WardenError};

/// One completed DNS transaction as the log store receives it.
///
/// `answer` and `orig_answer` are packed wire-format DNS messages;
/// `orig_answer` is only present when a post-upstream rewrite replaced the
/// answer the upstream actually returned.
#[derive(Debug, Clone)]
pub struct QueryLogRecord {
    pub client_ip: IpAddr,
    pub timestamp: DateTime<Utc>,
    pub question: DnsQuestion,
    pub client_proto: ClientProtocol,
    pub answer: Vec<u8>,
    pub orig_answer: Option<Vec<u8>>,
    pub reason: FilterReason,
    pub rule: Option<String>,
    pub filter_list_id: Option<i64>,
    pub service_name: Option<String>,
    pub elapsed: Duration,
    pub upstream: String,
}

/// A search term: bare values match as substrings, double-quoted values
/// require an exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringMatch {
    Substring(String),
    Exact(String),
}

impl StringMatch {
    /// Parse the user-facing form: `"host.example"` is exact, anything
    /// else is a substring.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            Some(StringMatch::Exact(raw[1..raw.len() - 1].to_lowercase()))
        } else {
            Some(StringMatch::Substring(raw.to_lowercase()))
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatch::Substring(needle) => value.to_lowercase().contains(needle),
            StringMatch::Exact(expected) => value.eq_ignore_ascii_case(expected),
        }
    }
}

/// Filtering-status buckets a search can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilteringStatus {
    #[default]
    All,
    /// Any non-NotFiltered outcome.
    Filtered,
    /// Blocked by a rule or a service bundle.
    Blocked,
    BlockedSafebrowsing,
    BlockedParental,
    Whitelisted,
    Rewritten,
    SafeSearch,
    /// Survived the pipeline without a block or whitelist.
    Processed,
}

impl FilteringStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "filtered" => FilteringStatus::Filtered,
            "blocked" => FilteringStatus::Blocked,
            "blocked_safebrowsing" => FilteringStatus::BlockedSafebrowsing,
            "blocked_parental" => FilteringStatus::BlockedParental,
            "whitelisted" => FilteringStatus::Whitelisted,
            "rewritten" => FilteringStatus::Rewritten,
            "safe_search" => FilteringStatus::SafeSearch,
            "processed" => FilteringStatus::Processed,
            _ => FilteringStatus::All,
        }
    }

    pub fn accepts(&self, reason: FilterReason) -> bool {
        match self {
            FilteringStatus::All => true,
            FilteringStatus::Filtered => reason.is_filtered(),
            FilteringStatus::Blocked => reason.is_blocked(),
            FilteringStatus::BlockedSafebrowsing => reason == FilterReason::FilteredSafeBrowsing,
            FilteringStatus::BlockedParental => reason == FilterReason::FilteredParental,
            FilteringStatus::Whitelisted => reason == FilterReason::NotFilteredAllowed,
            FilteringStatus::Rewritten => reason == FilterReason::Rewritten,
            FilteringStatus::SafeSearch => reason == FilterReason::FilteredSafeSearch,
            FilteringStatus::Processed => !reason.is_filtered(),
        }
    }
}

/// Search request. `older_than == None` means "now".
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub older_than: Option<DateTime<Utc>>,
    pub limit: usize,
    pub search: Option<StringMatch>,
    pub client: Option<StringMatch>,
    pub qtype: Option<warden_dns_domain::RecordType>,
    pub status: FilteringStatus,
}

impl SearchCriteria {
    /// True when a record passes every configured predicate.
    pub fn matches(&self, record: &QueryLogRecord) -> bool {
        if let Some(older_than) = self.older_than {
            if record.timestamp >= older_than {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !search.matches(&record.question.host) {
                return false;
            }
        }
        if let Some(client) = &self.client {
            if !client.matches(&record.client_ip.to_string()) {
                return false;
            }
        }
        if let Some(qtype) = self.qtype {
            if record.question.qtype != qtype {
                return false;
            }
        }
        self.status.accepts(record.reason)
    }
}

/// Search response. `oldest` is set when the scan bound was hit before
/// `limit` matches accumulated; it is the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub entries: Vec<QueryLogRecord>,
    pub oldest: Option<DateTime<Utc>>,
}

/// Port for the query-log store.
#[async_trait]
pub trait QueryLogStore: Send + Sync {
    /// Append one record. Never blocks on disk I/O; flushing happens in a
    /// background task.
    fn append(&self, record: QueryLogRecord);

    /// Newest-first search across the memory buffer and both log files.
    async fn search(&self, criteria: SearchCriteria) -> Result<SearchResult, WardenError>;

    /// Drain the memory buffer to disk and wait for completion.
    async fn flush(&self) -> Result<(), WardenError>;

    /// Rotate the on-disk file when the retention boundary is crossed.
    async fn rotate(&self) -> Result<(), WardenError>;

    /// Remove both file generations and drop the buffer.
    async fn clear(&self) -> Result<(), WardenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_match_parse() {
        assert_eq!(
            StringMatch::parse("ads.example"),
            Some(StringMatch::Substring("ads.example".into()))
        );
        assert_eq!(
            StringMatch::parse("\"ads.example\""),
            Some(StringMatch::Exact("ads.example".into()))
        );
        assert_eq!(StringMatch::parse("  "), None);
    }

    #[test]
    fn test_string_match_semantics() {
        let sub = StringMatch::Substring("test".into());
        assert!(sub.matches("a.test"));
        assert!(sub.matches("b.TEST"));

        let exact = StringMatch::Exact("a.test".into());
        assert!(exact.matches("a.test"));
        assert!(!exact.matches("aa.test"));
    }

    #[test]
    fn test_status_buckets() {
        assert!(FilteringStatus::Filtered.accepts(FilterReason::FilteredBlockList));
        assert!(!FilteringStatus::Filtered.accepts(FilterReason::NotFiltered));
        assert!(FilteringStatus::Blocked.accepts(FilterReason::FilteredBlockedService));
        assert!(!FilteringStatus::Blocked.accepts(FilterReason::FilteredSafeBrowsing));
        assert!(FilteringStatus::Processed.accepts(FilterReason::NotFilteredAllowed));
        assert!(FilteringStatus::Whitelisted.accepts(FilterReason::NotFilteredAllowed));
    }
}
