use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use warden_dns_domain::WardenError;

/// A completed upstream exchange.
#[derive(Debug, Clone)]
pub struct UpstreamAnswer {
    /// Wire bytes of the full upstream response.
    pub wire: Bytes,
    /// Display identity of the upstream that answered (e.g. `tls://1.1.1.1:853`).
    pub upstream: Arc<str>,
    pub elapsed: Duration,
}

/// Port for the upstream pool.
#[async_trait]
pub trait UpstreamExchanger: Send + Sync {
    /// Forward a wire-format query to the upstream selected by the active
    /// mode. `host` is the (lower-cased) question name, used for
    /// domain-scoped upstream routing without re-parsing the message.
    async fn exchange(&self, query_wire: &[u8], host: &str) -> Result<UpstreamAnswer, WardenError>;
}
