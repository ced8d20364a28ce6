use crate::blocking::BlockingMode;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Upstream selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamMode {
    /// Round-robin with a failure window that demotes misbehaving endpoints.
    #[default]
    LoadBalance,
    /// Fan out to all upstreams, first successful reply wins.
    Parallel,
    /// Probe returned addresses and prefer the answer whose IP connects fastest.
    FastestAddr,
}

/// DNS serving and forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream specs: `host:port`, `tcp://`, `tls://`, `https://`,
    /// `quic://`, `sdns://`, optionally domain-scoped `[/d1/d2/]spec`.
    #[serde(default = "default_upstreams")]
    pub upstream_dns: Vec<String>,

    /// Plain resolvers used only to resolve secure-upstream hostnames.
    #[serde(default = "default_bootstrap")]
    pub bootstrap_dns: Vec<String>,

    #[serde(default)]
    pub upstream_mode: UpstreamMode,

    #[serde(default)]
    pub blocking_mode: BlockingMode,

    #[serde(default = "default_blocking_ipv4")]
    pub blocking_ipv4: Ipv4Addr,

    #[serde(default = "default_blocking_ipv6")]
    pub blocking_ipv6: Ipv6Addr,

    /// TTL of synthesized blocked responses, seconds.
    #[serde(default = "default_blocked_response_ttl")]
    pub blocked_response_ttl: u32,

    /// Per-source-IP UDP queries per second; 0 disables the limit.
    #[serde(default = "default_ratelimit")]
    pub ratelimit: u32,

    #[serde(default)]
    pub refuse_any: bool,

    /// Insert an EDNS client-subnet option into upstream queries.
    #[serde(default)]
    pub edns_client_subnet: bool,

    /// Pass the DNSSEC DO bit through to upstream.
    #[serde(default)]
    pub enable_dnssec: bool,

    /// Answer AAAA questions with an empty success and strip AAAA records
    /// from upstream answers.
    #[serde(default)]
    pub disable_ipv6: bool,

    /// Per-query upstream deadline, seconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,

    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default)]
    pub cache_ttl_min: u32,

    #[serde(default)]
    pub cache_ttl_max: u32,

    /// Maximum UDP payload advertised and honored, bytes.
    #[serde(default = "default_max_udp_size")]
    pub max_udp_size: u16,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: default_port(),
            upstream_dns: default_upstreams(),
            bootstrap_dns: default_bootstrap(),
            upstream_mode: UpstreamMode::default(),
            blocking_mode: BlockingMode::default(),
            blocking_ipv4: default_blocking_ipv4(),
            blocking_ipv6: default_blocking_ipv6(),
            blocked_response_ttl: default_blocked_response_ttl(),
            ratelimit: default_ratelimit(),
            refuse_any: false,
            edns_client_subnet: false,
            enable_dnssec: false,
            disable_ipv6: false,
            upstream_timeout: default_upstream_timeout(),
            cache_size: default_cache_size(),
            cache_ttl_min: 0,
            cache_ttl_max: 0,
            max_udp_size: default_max_udp_size(),
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    53
}

fn default_upstreams() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}

fn default_bootstrap() -> Vec<String> {
    vec!["9.9.9.10:53".to_string()]
}

fn default_blocking_ipv4() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_blocking_ipv6() -> Ipv6Addr {
    Ipv6Addr::UNSPECIFIED
}

fn default_blocked_response_ttl() -> u32 {
    10
}

fn default_ratelimit() -> u32 {
    20
}

fn default_upstream_timeout() -> u64 {
    10
}

fn default_cache_size() -> usize {
    4096
}

fn default_max_udp_size() -> u16 {
    1232
}
