use serde::{Deserialize, Serialize};

/// Supported query-log retention periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RetentionDays {
    One,
    Seven,
    Thirty,
    Ninety,
}

impl RetentionDays {
    pub fn as_days(self) -> u32 {
        match self {
            RetentionDays::One => 1,
            RetentionDays::Seven => 7,
            RetentionDays::Thirty => 30,
            RetentionDays::Ninety => 90,
        }
    }
}

impl Default for RetentionDays {
    fn default() -> Self {
        RetentionDays::Ninety
    }
}

impl TryFrom<u32> for RetentionDays {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RetentionDays::One),
            7 => Ok(RetentionDays::Seven),
            30 => Ok(RetentionDays::Thirty),
            90 => Ok(RetentionDays::Ninety),
            other => Err(format!(
                "unsupported retention {} (expected 1, 7, 30 or 90 days)",
                other
            )),
        }
    }
}

impl From<RetentionDays> for u32 {
    fn from(value: RetentionDays) -> Self {
        value.as_days()
    }
}

/// Query-log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When false, entries stay in the memory ring and are never flushed.
    #[serde(default = "default_true")]
    pub file_enabled: bool,

    #[serde(default)]
    pub retention: RetentionDays,

    /// In-memory buffer capacity before a flush is scheduled.
    #[serde(default = "default_mem_size")]
    pub mem_size: usize,

    /// Mask client IPs (/24 for IPv4, /112 for IPv6) before writing.
    #[serde(default)]
    pub anonymize_client_ip: bool,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_enabled: true,
            retention: RetentionDays::default(),
            mem_size: default_mem_size(),
            anonymize_client_ip: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mem_size() -> usize {
    5000
}
