use async_trait::async_trait;

/// Reputation-oracle answer for one host.
///
/// `Unknown` covers oracle timeouts and transport errors; the pipeline
/// treats it as not blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    Blocked,
    Clean,
    Unknown,
}

/// Port for a hashed-prefix reputation oracle (safe browsing / parental).
#[async_trait]
pub trait SafetyOracle: Send + Sync {
    async fn check(&self, host: &str) -> SafetyVerdict;
}
