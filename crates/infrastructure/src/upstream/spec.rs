use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use warden_dns_domain::WardenError;

/// Wire scheme of one upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
}

impl UpstreamScheme {
    pub fn default_port(self) -> u16 {
        match self {
            UpstreamScheme::Udp | UpstreamScheme::Tcp => 53,
            UpstreamScheme::Tls => 853,
            UpstreamScheme::Https => 443,
            UpstreamScheme::Quic => 784,
        }
    }

    pub fn needs_tls_name(self) -> bool {
        matches!(self, UpstreamScheme::Tls | UpstreamScheme::Quic)
    }
}

/// One parsed upstream spec.
///
/// `domains` carries the optional `[/d1/d2/]` scope: when non-empty the
/// endpoint only serves questions whose name falls under one of the listed
/// domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSpec {
    pub original: String,
    pub scheme: UpstreamScheme,
    /// Hostname or IP literal (no brackets, no port).
    pub host: String,
    pub port: u16,
    /// Full URL for DoH endpoints.
    pub url: Option<String>,
    pub domains: Vec<String>,
}

impl UpstreamSpec {
    /// Parse one upstream line.
    pub fn parse(raw: &str) -> Result<Self, WardenError> {
        let raw = raw.trim();
        let (domains, rest) = split_domain_scope(raw)?;

        let mut spec = if let Some(b64) = rest.strip_prefix("sdns://") {
            parse_stamp(rest, b64)?
        } else if let Some(addr) = rest.strip_prefix("tcp://") {
            from_host_port(rest, addr, UpstreamScheme::Tcp)?
        } else if let Some(addr) = rest.strip_prefix("tls://") {
            from_host_port(rest, addr, UpstreamScheme::Tls)?
        } else if let Some(addr) = rest.strip_prefix("quic://") {
            from_host_port(rest, addr, UpstreamScheme::Quic)?
        } else if rest.starts_with("https://") {
            parse_https(rest)?
        } else if let Some(addr) = rest.strip_prefix("udp://") {
            from_host_port(rest, addr, UpstreamScheme::Udp)?
        } else {
            from_host_port(rest, rest, UpstreamScheme::Udp)?
        };

        spec.original = raw.to_string();
        spec.domains = domains;
        Ok(spec)
    }

    /// Whether this endpoint serves `host` under its domain scope.
    /// Unscoped endpoints serve everything.
    pub fn serves(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        self.domains.iter().any(|domain| {
            host == domain
                || (host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
        })
    }

    pub fn is_scoped(&self) -> bool {
        !self.domains.is_empty()
    }

    /// The hostname that must be bootstrap-resolved, if `host` is not an
    /// IP literal.
    pub fn hostname_needing_resolution(&self) -> Option<&str> {
        if self.host.parse::<std::net::IpAddr>().is_ok() {
            None
        } else {
            Some(&self.host)
        }
    }
}

impl std::fmt::Display for UpstreamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Split the optional `[/d1/d2/]` scope prefix off a spec.
fn split_domain_scope(raw: &str) -> Result<(Vec<String>, &str), WardenError> {
    let Some(rest) = raw.strip_prefix("[/") else {
        return Ok((Vec::new(), raw));
    };
    let Some(end) = rest.find("/]") else {
        return Err(WardenError::InvalidUpstream(
            raw.to_string(),
            "unterminated domain scope".into(),
        ));
    };
    let domains: Vec<String> = rest[..end]
        .split('/')
        .filter(|d| !d.is_empty())
        .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
        .collect();
    if domains.is_empty() {
        return Err(WardenError::InvalidUpstream(
            raw.to_string(),
            "empty domain scope".into(),
        ));
    }
    Ok((domains, &rest[end + 2..]))
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
fn split_host_port(input: &str) -> Result<(String, Option<u16>), String> {
    if let Some(rest) = input.strip_prefix('[') {
        let Some(close) = rest.find(']') else {
            return Err("unterminated IPv6 literal".into());
        };
        let host = rest[..close].to_string();
        let after = &rest[close + 1..];
        if after.is_empty() {
            return Ok((host, None));
        }
        let port = after
            .strip_prefix(':')
            .ok_or("expected ':' after IPv6 literal")?
            .parse::<u16>()
            .map_err(|e| format!("invalid port: {}", e))?;
        return Ok((host, Some(port)));
    }

    // A bare IPv6 literal has multiple colons and no port.
    if input.matches(':').count() > 1 {
        return Ok((input.to_string(), None));
    }
    match input.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|e| format!("invalid port: {}", e))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((input.to_string(), None)),
    }
}

fn from_host_port(
    original: &str,
    addr: &str,
    scheme: UpstreamScheme,
) -> Result<UpstreamSpec, WardenError> {
    let (host, port) = split_host_port(addr)
        .map_err(|e| WardenError::InvalidUpstream(original.to_string(), e))?;
    if host.is_empty() {
        return Err(WardenError::InvalidUpstream(
            original.to_string(),
            "empty host".into(),
        ));
    }
    Ok(UpstreamSpec {
        original: original.to_string(),
        scheme,
        host: host.to_ascii_lowercase(),
        port: port.unwrap_or_else(|| scheme.default_port()),
        url: None,
        domains: Vec::new(),
    })
}

fn parse_https(raw: &str) -> Result<UpstreamSpec, WardenError> {
    let without_scheme = &raw["https://".len()..];
    let (authority, _path) = match without_scheme.find('/') {
        Some(idx) => (&without_scheme[..idx], &without_scheme[idx..]),
        None => (without_scheme, "/dns-query"),
    };
    let (host, port) = split_host_port(authority)
        .map_err(|e| WardenError::InvalidUpstream(raw.to_string(), e))?;
    if host.is_empty() {
        return Err(WardenError::InvalidUpstream(
            raw.to_string(),
            "empty host".into(),
        ));
    }
    Ok(UpstreamSpec {
        original: raw.to_string(),
        scheme: UpstreamScheme::Https,
        host: host.to_ascii_lowercase(),
        port: port.unwrap_or(443),
        url: Some(raw.to_string()),
        domains: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// DNS stamp (sdns://) decoding
// ---------------------------------------------------------------------------

struct StampReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StampReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.data.len() {
            return None;
        }
        self.pos += n;
        Some(())
    }

    /// One length-prefixed string.
    fn lp_string(&mut self) -> Option<String> {
        let len = self.byte()? as usize;
        let end = self.pos.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        let s = String::from_utf8_lossy(&self.data[self.pos..end]).into_owned();
        self.pos = end;
        Some(s)
    }

    /// A set of length-prefixed items where the high bit marks
    /// continuation; items are discarded.
    fn skip_vlp(&mut self) -> Option<()> {
        loop {
            let len = self.byte()?;
            self.skip((len & 0x7f) as usize)?;
            if len & 0x80 == 0 {
                return Some(());
            }
        }
    }
}

/// Decode a DNS stamp into a spec. Plain (0x00), DoH (0x02), DoT (0x03)
/// and DoQ (0x04) stamps are supported.
fn parse_stamp(original: &str, b64: &str) -> Result<UpstreamSpec, WardenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(b64.trim_end_matches('='))
        .map_err(|e| WardenError::InvalidUpstream(original.to_string(), format!("bad base64: {}", e)))?;

    let mut reader = StampReader::new(&bytes);
    let err = |msg: &str| WardenError::InvalidUpstream(original.to_string(), msg.to_string());

    let proto = reader.byte().ok_or_else(|| err("truncated stamp"))?;
    reader.skip(8).ok_or_else(|| err("truncated stamp props"))?;

    match proto {
        // Plain DNS
        0x00 => {
            let addr = reader.lp_string().ok_or_else(|| err("missing address"))?;
            let mut spec = from_host_port(original, &addr, UpstreamScheme::Udp)?;
            spec.original = original.to_string();
            Ok(spec)
        }
        // DoH
        0x02 => {
            let addr = reader.lp_string().ok_or_else(|| err("missing address"))?;
            reader.skip_vlp().ok_or_else(|| err("truncated hashes"))?;
            let hostname = reader.lp_string().ok_or_else(|| err("missing hostname"))?;
            let path = reader.lp_string().unwrap_or_else(|| "/dns-query".to_string());
            let (host, port) = if hostname.is_empty() {
                split_host_port(&addr)
                    .map_err(|e| WardenError::InvalidUpstream(original.to_string(), e))?
            } else {
                split_host_port(&hostname)
                    .map_err(|e| WardenError::InvalidUpstream(original.to_string(), e))?
            };
            let port = port.unwrap_or(443);
            Ok(UpstreamSpec {
                original: original.to_string(),
                scheme: UpstreamScheme::Https,
                url: Some(format!("https://{}{}", host, path)),
                host: host.to_ascii_lowercase(),
                port,
                domains: Vec::new(),
            })
        }
        // DoT / DoQ share a layout
        0x03 | 0x04 => {
            let addr = reader.lp_string().ok_or_else(|| err("missing address"))?;
            reader.skip_vlp().ok_or_else(|| err("truncated hashes"))?;
            let hostname = reader.lp_string().ok_or_else(|| err("missing hostname"))?;
            let scheme = if proto == 0x03 {
                UpstreamScheme::Tls
            } else {
                UpstreamScheme::Quic
            };
            let source = if hostname.is_empty() { addr } else { hostname };
            let mut spec = from_host_port(original, &source, scheme)?;
            spec.original = original.to_string();
            Ok(spec)
        }
        other => Err(err(&format!("unsupported stamp protocol 0x{:02x}", other))),
    }
}
