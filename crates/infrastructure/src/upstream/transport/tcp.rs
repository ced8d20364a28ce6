use super::{DnsTransport, TransportResponse};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;
use warden_dns_domain::WardenError;

/// Pooled connections idle longer than this are discarded.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_POOLED: usize = 4;

/// DNS over TCP (RFC 1035 §4.2.2 length framing) with a small connection
/// pool per endpoint.
pub struct TcpTransport {
    server_addr: SocketAddr,
    pool: Mutex<Vec<(TcpStream, Instant)>>,
}

impl TcpTransport {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            pool: Mutex::new(Vec::new()),
        }
    }

    async fn acquire(&self, timeout: Duration) -> Result<TcpStream, WardenError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some((stream, parked_at)) = pool.pop() {
                if parked_at.elapsed() < IDLE_TIMEOUT {
                    return Ok(stream);
                }
            }
        }
        let stream = tokio::time::timeout(timeout, TcpStream::connect(self.server_addr))
            .await
            .map_err(|_| WardenError::QueryTimeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn release(&self, stream: TcpStream) {
        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOLED {
            pool.push((stream, Instant::now()));
        }
    }

    async fn roundtrip(
        stream: &mut TcpStream,
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
impl DnsTransport for TcpTransport {
    async fn send(
        &self,
        message_bytes: &[u8],
        timeout: Duration,
    ) -> Result<TransportResponse, WardenError> {
        // A parked connection may have been closed server-side; retry once
        // with a fresh socket before giving up.
        let mut stream = self.acquire(timeout).await?;
        let response = match Self::roundtrip(&mut stream, message_bytes, timeout).await {
            Ok(r) => r,
            Err(_) => {
                let mut fresh = tokio::time::timeout(timeout, TcpStream::connect(self.server_addr))
                    .await
                    .map_err(|_| WardenError::QueryTimeout)??;
                fresh.set_nodelay(true)?;
                let response = Self::roundtrip(&mut fresh, message_bytes, timeout).await?;
                stream = fresh;
                response
            }
        };

        debug!(server = %self.server_addr, bytes_received = response.len(), "TCP response received");
        self.release(stream).await;

        Ok(TransportResponse {
            bytes: response,
            protocol_used: "TCP",
        })
    }

    fn protocol_name(&self) -> &'static str {
        "TCP"
    }
}
