use serde::{Deserialize, Serialize};

/// Per-client filtering overrides.
///
/// A manual client can either follow the global toggles or carry its own;
/// the same split applies to the blocked-services set. Client decisions
/// always win over global ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientSettings {
    #[serde(default = "default_true")]
    pub use_global_settings: bool,
    #[serde(default = "default_true")]
    pub filtering_enabled: bool,
    #[serde(default)]
    pub safebrowsing_enabled: bool,
    #[serde(default)]
    pub parental_enabled: bool,
    #[serde(default)]
    pub safesearch_enabled: bool,
    #[serde(default = "default_true")]
    pub use_global_blocked_services: bool,
    #[serde(default)]
    pub blocked_services: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            use_global_settings: true,
            filtering_enabled: true,
            safebrowsing_enabled: false,
            parental_enabled: false,
            safesearch_enabled: false,
            use_global_blocked_services: true,
            blocked_services: Vec::new(),
        }
    }
}

/// A manually configured client.
///
/// `ids` entries are IPs, CIDRs, or MAC addresses; MACs are resolved
/// through the DHCP lease lookup at match time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManualClient {
    pub name: String,
    pub ids: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub settings: ClientSettings,
}

fn default_true() -> bool {
    true
}
