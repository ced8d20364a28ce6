use serde::{Deserialize, Serialize};

/// Encrypted-listener configuration (DoT / DoQ / DoH).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub server_name: String,

    /// PEM certificate chain path.
    #[serde(default)]
    pub certificate_path: String,

    /// PEM private key path.
    #[serde(default)]
    pub private_key_path: String,

    #[serde(default = "default_port_dot")]
    pub port_dns_over_tls: u16,

    #[serde(default = "default_port_doq")]
    pub port_dns_over_quic: u16,

    #[serde(default = "default_port_doh")]
    pub port_https: u16,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_name: String::new(),
            certificate_path: String::new(),
            private_key_path: String::new(),
            port_dns_over_tls: default_port_dot(),
            port_dns_over_quic: default_port_doq(),
            port_https: default_port_doh(),
        }
    }
}

fn default_port_dot() -> u16 {
    853
}

fn default_port_doq() -> u16 {
    784
}

fn default_port_doh() -> u16 {
    443
}
