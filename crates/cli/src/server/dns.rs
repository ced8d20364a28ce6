use hickory_server::ServerFuture;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as TlsServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tracing::info;
use warden_dns_domain::Config;
use warden_dns_infrastructure::server::WardenHandler;

const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind every configured listener and register it with the server.
///
/// Plain UDP/TCP always start; DoT (853), DoQ (784) and DoH (443) start
/// when TLS is enabled and a certificate pair is configured. A bind
/// failure here is fatal by design.
pub async fn start(
    config: &Config,
    handler: WardenHandler,
) -> anyhow::Result<ServerFuture<WardenHandler>> {
    let addr: SocketAddr = format!("{}:{}", config.dns.bind_host, config.dns.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let mut server = ServerFuture::new(handler);

    // UDP with enlarged kernel buffers; bursts of small datagrams overrun
    // the defaults long before the worker pool saturates.
    let udp_socket = bind_udp(addr)?;
    server.register_socket(udp_socket);

    let tcp_listener = TcpListener::bind(addr).await?;
    server.register_listener(tcp_listener, TCP_TIMEOUT);
    info!(bind = %addr, "DNS listeners bound (udp, tcp)");

    if config.tls.enabled {
        let tls_config = Arc::new(load_tls_config(config)?);

        let dot_addr = SocketAddr::new(addr.ip(), config.tls.port_dns_over_tls);
        let dot_listener = TcpListener::bind(dot_addr).await?;
        server.register_tls_listener_with_tls_config(dot_listener, TCP_TIMEOUT, tls_config.clone())?;
        info!(bind = %dot_addr, "DoT listener bound");

        let doq_addr = SocketAddr::new(addr.ip(), config.tls.port_dns_over_quic);
        let doq_socket = UdpSocket::bind(doq_addr).await?;
        server.register_quic_listener(
            doq_socket,
            TCP_TIMEOUT,
            tls_config.clone(),
            Some(config.tls.server_name.clone()),
        )?;
        info!(bind = %doq_addr, "DoQ listener bound");

        let doh_addr = SocketAddr::new(addr.ip(), config.tls.port_https);
        let doh_listener = TcpListener::bind(doh_addr).await?;
        server.register_https_listener(
            doh_listener,
            TCP_TIMEOUT,
            tls_config,
            Some(config.tls.server_name.clone()),
            "/dns-query".to_string(),
        )?;
        info!(bind = %doh_addr, "DoH listener bound");
    }

    Ok(server)
}

fn bind_udp(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_recv_buffer_size(8 * 1024 * 1024)?;
    socket.set_send_buffer_size(4 * 1024 * 1024)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

fn load_tls_config(config: &Config) -> anyhow::Result<TlsServerConfig> {
    let cert_pem = std::fs::read(&config.tls.certificate_path).map_err(|e| {
        anyhow::anyhow!("cannot read certificate {}: {}", config.tls.certificate_path, e)
    })?;
    let key_pem = std::fs::read(&config.tls.private_key_path).map_err(|e| {
        anyhow::anyhow!("cannot read private key {}: {}", config.tls.private_key_path, e)
    })?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<Result<_, _>>()?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .ok_or_else(|| anyhow::anyhow!("no private key in {}", config.tls.private_key_path))?;

    let mut tls_config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"dot".to_vec(), b"doq".to_vec()];
    Ok(tls_config)
}
