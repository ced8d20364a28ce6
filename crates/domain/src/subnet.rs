use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Longest-prefix CIDR matcher.
///
/// Networks are kept sorted by prefix length descending, so the first hit
/// during a scan is the most specific one. A bare IP in the input becomes a
/// /32 (or /128) network and therefore always beats a wider CIDR covering
/// the same address.
#[derive(Debug, Clone, Default)]
pub struct SubnetMatcher<T> {
    networks: Vec<(IpNetwork, T)>,
}

impl<T: Clone> SubnetMatcher<T> {
    pub fn new() -> Self {
        Self { networks: Vec::new() }
    }

    /// Build from `(spec, value)` pairs where `spec` is an IP or a CIDR.
    /// Invalid specs are returned as errors with the offending spec text.
    pub fn from_specs<I>(specs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut matcher = Self::new();
        for (spec, value) in specs {
            matcher.insert(&spec, value)?;
        }
        Ok(matcher)
    }

    pub fn insert(&mut self, spec: &str, value: T) -> Result<(), String> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err("subnet spec cannot be empty".into());
        }
        let network = if spec.contains('/') {
            spec.parse::<IpNetwork>()
                .map_err(|e| format!("invalid CIDR '{}': {}", spec, e))?
        } else {
            let ip = spec
                .parse::<IpAddr>()
                .map_err(|e| format!("invalid IP '{}': {}", spec, e))?;
            IpNetwork::from(ip)
        };
        // Keep sorted: most specific prefix first.
        let pos = self
            .networks
            .partition_point(|(n, _)| n.prefix() >= network.prefix());
        self.networks.insert(pos, (network, value));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Most specific network containing `ip`, if any.
    pub fn longest_match(&self, ip: IpAddr) -> Option<&T> {
        self.networks
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.longest_match(ip).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let matcher = SubnetMatcher::from_specs(vec![
            ("10.0.0.0/8".to_string(), "wide"),
            ("10.1.2.0/24".to_string(), "narrow"),
            ("10.1.2.3".to_string(), "exact"),
        ])
        .unwrap();

        assert_eq!(matcher.longest_match("10.1.2.3".parse().unwrap()), Some(&"exact"));
        assert_eq!(matcher.longest_match("10.1.2.9".parse().unwrap()), Some(&"narrow"));
        assert_eq!(matcher.longest_match("10.9.9.9".parse().unwrap()), Some(&"wide"));
        assert_eq!(matcher.longest_match("192.168.0.1".parse().unwrap()), None);
    }

    #[test]
    fn test_ipv6_networks() {
        let matcher =
            SubnetMatcher::from_specs(vec![("2001:db8::/32".to_string(), 1)]).unwrap();
        assert!(matcher.contains("2001:db8::1".parse().unwrap()));
        assert!(!matcher.contains("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let mut matcher: SubnetMatcher<i32> = SubnetMatcher::new();
        assert!(matcher.insert("not-an-ip", 1).is_err());
        assert!(matcher.insert("10.0.0.0/99", 1).is_err());
        assert!(matcher.insert("", 1).is_err());
    }
}
