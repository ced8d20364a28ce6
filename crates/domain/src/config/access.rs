use serde::{Deserialize, Serialize};

/// Client and host access control, evaluated before any rule matching.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Non-empty means whitelist mode: every other source is denied.
    #[serde(default)]
    pub allowed_clients: Vec<String>,

    /// IPs or CIDRs to deny. Longest prefix wins against `allowed_clients`.
    #[serde(default)]
    pub disallowed_clients: Vec<String>,

    /// Exact hosts or `*.suffix` wildcards refused outright.
    #[serde(default)]
    pub blocked_hosts: Vec<String>,
}
