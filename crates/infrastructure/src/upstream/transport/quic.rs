use super::{DnsTransport, TransportResponse};
use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Connection, Endpoint};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use warden_dns_domain::WardenError;

/// DNS over QUIC (RFC 9250). Each query opens a fresh bidirectional
/// stream on a cached connection; the connection is re-dialed after
/// transport errors.
pub struct QuicTransport {
    server_addr: SocketAddr,
    hostname: String,
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
}

impl QuicTransport {
    pub fn new(server_addr: SocketAddr, hostname: String) -> Result<Self, WardenError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![b"doq".to_vec()];

        let quic_config = QuicClientConfig::try_from(tls)
            .map_err(|e| WardenError::InvalidUpstream(hostname.clone(), e.to_string()))?;
        let client_config = ClientConfig::new(Arc::new(quic_config));

        let bind: SocketAddr = if server_addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| WardenError::IoError(format!("QUIC endpoint bind failed: {}", e)))?;
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            server_addr,
            hostname,
            endpoint,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self, timeout: Duration) -> Result<Connection, WardenError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }

        let connecting = self
            .endpoint
            .connect(self.server_addr, &self.hostname)
            .map_err(|e| WardenError::IoError(format!("QUIC connect failed: {}", e)))?;
        let conn = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| WardenError::IoError(format!("QUIC handshake failed: {}", e)))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl DnsTransport for QuicTransport {
    async fn send(
        &self,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<TransportResponse, WardenError> {
        // DoQ requires message ID 0 on the wire; the pool matches on the ID
        // it generated, so zero it here and restore it on the way back.
        let mut framed = Vec::with_capacity(message_bytes.len() + 2);
        framed.extend_from_slice(&(message_bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(message_bytes);
        framed[2] = 0;
        framed[3] = 0;

        let conn = self.connection(timeout).await?;
        let (mut send, mut recv) = tokio::time::timeout(timeout, conn.open_bi())
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| WardenError::IoError(format!("QUIC stream open failed: {}", e)))?;

        tokio::time::timeout(timeout, send.write_all(&framed))
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| WardenError::IoError(format!("QUIC write failed: {}", e)))?;
        send.finish()
            .map_err(|e| WardenError::IoError(format!("QUIC stream finish failed: {}", e)))?;

        let mut len_buf = [0u8; 2];
        tokio::time::timeout(timeout, recv.read_exact(&mut len_buf))
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| WardenError::IoError(format!("QUIC read failed: {}", e)))?;
        let response_len = u16::from_be_bytes(len_buf) as usize;

        let mut response = vec![0u8; response_len];
        tokio::time::timeout(timeout, recv.read_exact(&mut response))
            .await
            .map_err(|_| WardenError::QueryTimeout)?
            .map_err(|e| WardenError::IoError(format!("QUIC read failed: {}", e)))?;

        if response.len() >= 2 {
            response[0] = message_bytes[0];
            response[1] = message_bytes[1];
        }

        debug!(server = %self.server_addr, bytes_received = response.len(), "QUIC response received");

        Ok(TransportResponse {
            bytes: response,
            protocol_used: "QUIC",
        })
    }

    fn protocol_name(&self) -> &'static str {
        "QUIC"
    }
}
