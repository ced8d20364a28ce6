use crate::filter_list::FilterList;
use crate::rewrite::RewriteEntry;
use serde::{Deserialize, Serialize};

/// Filtering configuration: lists, user rules, rewrites, safety toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilteringConfig {
    #[serde(default = "default_true")]
    pub filtering_enabled: bool,

    #[serde(default)]
    pub filters: Vec<FilterList>,

    /// The user-edited rules list (list ID 0).
    #[serde(default)]
    pub user_rules: Vec<String>,

    #[serde(default)]
    pub rewrites: Vec<RewriteEntry>,

    /// Globally enabled blocked-service bundle names.
    #[serde(default)]
    pub blocked_services: Vec<String>,

    #[serde(default)]
    pub safebrowsing_enabled: bool,

    #[serde(default)]
    pub parental_enabled: bool,

    #[serde(default)]
    pub safesearch_enabled: bool,

    /// Refresh interval for remote lists, hours. 0 disables refresh.
    /// Accepted values: 0, 1, 12, 24, 72, 168.
    #[serde(default = "default_update_interval")]
    pub filters_update_interval_hours: u32,

    /// Zone queried by the safe-browsing oracle.
    #[serde(default = "default_safebrowsing_zone")]
    pub safebrowsing_zone: String,

    /// Zone queried by the parental-control oracle.
    #[serde(default = "default_parental_zone")]
    pub parental_zone: String,

    /// Plain resolver used for oracle TXT lookups.
    #[serde(default = "default_safety_upstream")]
    pub safety_upstream: String,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            filtering_enabled: true,
            filters: Vec::new(),
            user_rules: Vec::new(),
            rewrites: Vec::new(),
            blocked_services: Vec::new(),
            safebrowsing_enabled: false,
            parental_enabled: false,
            safesearch_enabled: false,
            filters_update_interval_hours: default_update_interval(),
            safebrowsing_zone: default_safebrowsing_zone(),
            parental_zone: default_parental_zone(),
            safety_upstream: default_safety_upstream(),
        }
    }
}

impl FilteringConfig {
    /// Update interval normalized to the supported ladder.
    pub fn normalized_update_interval(&self) -> u32 {
        match self.filters_update_interval_hours {
            0 => 0,
            1 => 1,
            12 => 12,
            72 => 72,
            168 => 168,
            _ => 24,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u32 {
    24
}

fn default_safebrowsing_zone() -> String {
    "sb.dns.warden.example".to_string()
}

fn default_parental_zone() -> String {
    "pc.dns.warden.example".to_string()
}

fn default_safety_upstream() -> String {
    "9.9.9.10:53".to_string()
}
