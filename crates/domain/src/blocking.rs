use serde::{Deserialize, Serialize};

/// How block verdicts are turned into wire responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// NXDOMAIN for adblock-style rules, the rule's IP for hosts-style rules.
    #[default]
    Default,
    Refused,
    Nxdomain,
    NullIp,
    CustomIp,
}

impl BlockingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingMode::Default => "default",
            BlockingMode::Refused => "refused",
            BlockingMode::Nxdomain => "nxdomain",
            BlockingMode::NullIp => "null_ip",
            BlockingMode::CustomIp => "custom_ip",
        }
    }
}
