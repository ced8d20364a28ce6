use rustc_hash::FxHashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use warden_dns_domain::{RecordType, RewriteAnswer};

/// Safe endpoint for one search engine.
#[derive(Debug, Clone)]
struct SafeEndpoint {
    cname: &'static str,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
}

/// Known search engines and their enforced-safe endpoints.
///
/// Engines whose safe endpoint has a fixed address are answered locally;
/// the rest surface a CNAME the caller re-resolves upstream.
pub struct SafeSearchTable {
    /// Host suffix → endpoint. `www.google.*` domains are matched by the
    /// dedicated google branch below.
    exact: FxHashMap<&'static str, SafeEndpoint>,
}

impl SafeSearchTable {
    pub fn new() -> Self {
        let mut exact = FxHashMap::default();
        exact.insert(
            "www.bing.com",
            SafeEndpoint {
                cname: "strict.bing.com",
                ipv4: None,
                ipv6: None,
            },
        );
        exact.insert(
            "duckduckgo.com",
            SafeEndpoint {
                cname: "safe.duckduckgo.com",
                ipv4: None,
                ipv6: None,
            },
        );
        exact.insert(
            "www.duckduckgo.com",
            SafeEndpoint {
                cname: "safe.duckduckgo.com",
                ipv4: None,
                ipv6: None,
            },
        );
        exact.insert(
            "yandex.ru",
            SafeEndpoint {
                cname: "familysearch.yandex.ru",
                ipv4: Some(Ipv4Addr::new(213, 180, 193, 56)),
                ipv6: None,
            },
        );
        exact.insert(
            "www.youtube.com",
            SafeEndpoint {
                cname: "restrictmoderate.youtube.com",
                ipv4: None,
                ipv6: None,
            },
        );
        exact.insert(
            "pixabay.com",
            SafeEndpoint {
                cname: "safesearch.pixabay.com",
                ipv4: None,
                ipv6: None,
            },
        );
        Self { exact }
    }

    /// Rewrite for a known engine host, or `None`.
    ///
    /// Only address questions are rewritten; other types go to upstream so
    /// engine MX/TXT lookups keep working.
    pub fn rewrite(&self, host: &str, qtype: RecordType) -> Option<RewriteAnswer> {
        if qtype != RecordType::A && qtype != RecordType::AAAA {
            return None;
        }

        // Google serves every country TLD; forcesafesearch has a stable
        // address published for exactly this purpose.
        if let Some(rest) = host.strip_prefix("www.google.") {
            if !rest.is_empty() && rest.len() <= 7 && rest.bytes().all(|b| b.is_ascii_alphabetic() || b == b'.') {
                let mut answer = RewriteAnswer {
                    cname: Some("forcesafesearch.google.com".to_string()),
                    ..Default::default()
                };
                if qtype == RecordType::A {
                    answer.ipv4.push(Ipv4Addr::new(216, 239, 38, 120));
                } else {
                    answer.ipv6.push("2001:4860:4802:32::78".parse().unwrap());
                }
                return Some(answer);
            }
        }

        let endpoint = self.exact.get(host)?;
        let mut answer = RewriteAnswer {
            cname: Some(endpoint.cname.to_string()),
            ..Default::default()
        };
        match qtype {
            RecordType::A => {
                if let Some(ip) = endpoint.ipv4 {
                    answer.ipv4.push(ip);
                }
            }
            RecordType::AAAA => {
                if let Some(ip) = endpoint.ipv6 {
                    answer.ipv6.push(ip);
                }
            }
            _ => unreachable!(),
        }
        Some(answer)
    }
}

impl Default for SafeSearchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_rewrite_has_fixed_address() {
        let table = SafeSearchTable::new();
        let answer = table.rewrite("www.google.com", RecordType::A).unwrap();
        assert_eq!(answer.cname.as_deref(), Some("forcesafesearch.google.com"));
        assert_eq!(answer.ipv4, vec![Ipv4Addr::new(216, 239, 38, 120)]);
    }

    #[test]
    fn test_google_cctld() {
        let table = SafeSearchTable::new();
        assert!(table.rewrite("www.google.co.uk", RecordType::A).is_some());
        assert!(table.rewrite("www.googleevil.com", RecordType::A).is_none());
    }

    #[test]
    fn test_cname_only_engine() {
        let table = SafeSearchTable::new();
        let answer = table.rewrite("duckduckgo.com", RecordType::A).unwrap();
        assert_eq!(answer.cname.as_deref(), Some("safe.duckduckgo.com"));
        assert!(answer.ipv4.is_empty());
    }

    #[test]
    fn test_non_address_types_untouched() {
        let table = SafeSearchTable::new();
        assert!(table.rewrite("www.google.com", RecordType::MX).is_none());
    }

    #[test]
    fn test_unknown_host_untouched() {
        let table = SafeSearchTable::new();
        assert!(table.rewrite("example.com", RecordType::A).is_none());
    }
}
