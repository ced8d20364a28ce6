use super::{DnsTransport, TransportResponse};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use warden_dns_domain::WardenError;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_POOLED: usize = 2;

/// Shared client config with the webpki root store; building it is
/// expensive and every DoT endpoint can reuse it.
static TLS_CONFIG: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

/// DNS over TLS (RFC 7858) with pooled sessions per endpoint.
pub struct TlsTransport {
    server_addr: SocketAddr,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    pool: Mutex<Vec<(TlsStream<TcpStream>, Instant)>>,
}

impl TlsTransport {
    pub fn new(server_addr: SocketAddr, hostname: String) -> Result<Self, WardenError> {
        let server_name = ServerName::try_from(hostname.clone())
            .map_err(|e| WardenError::InvalidUpstream(hostname, e.to_string()))?;
        Ok(Self {
            server_addr,
            server_name,
            connector: TlsConnector::from(Arc::clone(&TLS_CONFIG)),
            pool: Mutex::new(Vec::new()),
        })
    }

    async fn connect(&self, timeout: Duration) -> Result<TlsStream<TcpStream>, WardenError> {
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(self.server_addr))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;
        tcp.set_nodelay(true)?;
        let stream = tokio::time::timeout(
            timeout,
            self.connector.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| WardenError::QueryTimeout)??;
        Ok(stream)
    }

    async fn acquire(&self, timeout: Duration) -> Result<TlsStream<TcpStream>, WardenError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some((stream, parked_at)) = pool.pop() {
                if parked_at.elapsed() < IDLE_TIMEOUT {
                    return Ok(stream);
                }
            }
        }
        self.connect(timeout).await
    }

    async fn roundtrip(
        stream: &mut TlsStream<TcpStream>,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, WardenError> {
        let mut framed = Vec::with_capacity(message_bytes.len() + 2);
        framed.extend_from_slice(&(message_bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(message_bytes);

        tokio::time::timeout(timeout, stream.write_all(&framed))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;

        let mut len_buf = [0u8; 2];
        tokio::time::timeout(timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;
        let response_len = u16::from_be_bytes(len_buf) as usize;

        let mut response = vec![0u8; response_len];
        tokio::time::timeout(timeout, stream.read_exact(&mut response))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;
        Ok(response)
    }
}

#[async_trait]
impl DnsTransport for TlsTransport {
    async fn send(
        &self,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<TransportResponse, WardenError> {
        let mut stream = self.acquire(timeout).await?;
        let response = match Self::roundtrip(&mut stream, message_bytes, timeout).await {
            Ok(r) => r,
            Err(_) => {
                // Stale pooled session: one retry on a fresh handshake.
                let mut fresh = self.connect(timeout).await?;
                let response = Self::roundtrip(&mut fresh, message_bytes, timeout).await?;
                stream = fresh;
                response
            }
        };

        debug!(server = %self.server_addr, bytes_received = response.len(), "TLS response received");

        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOLED {
            pool.push((stream, Instant::now()));
        }

        Ok(TransportResponse {
            bytes: response,
            protocol_used: "TLS",
        })
    }

    fn protocol_name(&self) -> &'static str {
        "TLS"
    }
}
