use super::{DnsTransport, TransportResponse};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;
use warden_dns_domain::WardenError;

/// Expected content type for DNS-over-HTTPS exchanges (RFC 8484 §4.2.1).
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// DNS over HTTPS (RFC 8484). The reqwest client keeps the HTTP/2
/// connection pool per endpoint; the bootstrap-resolved address is pinned
/// so the DoH hostname never recurses through us.
pub struct HttpsTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpsTransport {
    pub fn new(
        url: String,
        hostname: &str,
        resolved: Vec<SocketAddr>,
    ) -> Result<Self, WardenError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .http2_prior_knowledge();
        if !resolved.is_empty() {
            builder = builder.resolve_to_addrs(hostname, &resolved);
        }
        let client = builder
            .build()
            .map_err(|e| WardenError::InvalidUpstream(url.clone(), e.to_string()))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl DnsTransport for HttpsTransport {
    async fn send(
        &self,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<TransportResponse, WardenError> {
        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.url)
                .header("Content-Type", DNS_MESSAGE_CONTENT_TYPE)
                .header("Accept", DNS_MESSAGE_CONTENT_TYPE)
                .body(message_bytes.to_vec())
                .send(),
        )
        .await
        .map_err(|_| WardenError::QueryTimeout)?
        .map_err(|e| WardenError::IoError(format!("DoH request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::InvalidDnsResponse(format!(
                "DoH server {} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }

        let response_bytes = tokio::time::timeout(timeout, response.bytes())
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| {
                WardenError::IoError(format!("failed to read DoH response from {}: {}", self.url, e))
            })?;

        debug!(url = %self.url, response_len = response_bytes.len(), "DoH response received");

        Ok(TransportResponse {
            bytes: response_bytes.to_vec(),
            protocol_used: "HTTPS",
        })
    }

    fn protocol_name(&self) -> &'static str {
        "HTTPS"
    }
}
