use serde::{Deserialize, Serialize};

/// Metadata for one filter list.
///
/// ID 0 is reserved for the user-edited rules list. IDs are never reused
/// within a process lifetime; the manager keeps a monotonic floor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterList {
    pub id: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rule_count: usize,
    /// UNIX seconds of the last successful refresh; mirrored by the cache
    /// file's mtime.
    #[serde(default)]
    pub last_updated: i64,
}

impl FilterList {
    /// User rules live under the reserved list ID 0.
    pub const USER_LIST_ID: i64 = 0;

    pub fn cache_file_name(&self) -> String {
        format!("{}.txt", self.id)
    }

    /// A list sourced from a local path rather than an URL.
    pub fn is_local(&self) -> bool {
        !self.url.starts_with("http://") && !self.url.starts_with("https://")
    }
}

fn default_enabled() -> bool {
    true
}
