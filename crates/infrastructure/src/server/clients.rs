use crate::filtering::hosts::HostsResolver;
use lru::LruCache;
use rustc_hash::FxHashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use warden_dns_domain::{FilteringConfig, ManualClient, SubnetMatcher};
use warden_dns_application::ports::LeaseLookup;

const RDNS_CACHE_SIZE: usize = 1024;
const RDNS_CACHE_TTL: Duration = Duration::from_secs(1800);

/// The toggles and service set that actually apply to one query after
/// per-client overrides are resolved. Client-level decisions always win
/// over global ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    /// Manual client name, when one matched.
    pub client_name: Option<String>,
    pub filtering_enabled: bool,
    pub safebrowsing_enabled: bool,
    pub parental_enabled: bool,
    pub safesearch_enabled: bool,
    pub blocked_services: Vec<String>,
    pub tags: Vec<String>,
}

/// Resolves a query's source address to its effective settings and a
/// display name.
///
/// Identity priority: manual client (IP, CIDR, or MAC via the lease
/// lookup) > DHCP lease hostname > `/etc/hosts` entry > cached rDNS.
pub struct ClientRegistry {
    clients: Vec<ManualClient>,
    by_subnet: SubnetMatcher<usize>,
    by_mac: FxHashMap<String, usize>,
    leases: Arc<dyn LeaseLookup>,
    rdns_cache: Mutex<LruCache<IpAddr, (Instant, Option<String>)>>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<ManualClient>, leases: Arc<dyn LeaseLookup>) -> Self {
        let mut by_subnet = SubnetMatcher::new();
        let mut by_mac = FxHashMap::default();

        for (idx, client) in clients.iter().enumerate() {
            for id in &client.ids {
                let id = id.trim();
                if looks_like_mac(id) {
                    by_mac.insert(id.to_ascii_lowercase(), idx);
                } else if let Err(e) = by_subnet.insert(id, idx) {
                    warn!(client = %client.name, id, error = %e, "Ignoring invalid client id");
                }
            }
        }

        Self {
            clients,
            by_subnet,
            by_mac,
            leases,
            rdns_cache: Mutex::new(LruCache::new(NonZeroUsize::new(RDNS_CACHE_SIZE).unwrap())),
        }
    }

    fn manual_for(&self, ip: IpAddr) -> Option<&ManualClient> {
        // Explicit IP/CIDR wins; longest prefix picks among overlaps.
        if let Some(&idx) = self.by_subnet.longest_match(ip) {
            return self.clients.get(idx);
        }
        // MACs only match when the lease table knows the source.
        if !self.by_mac.is_empty() {
            if let Some(mac) = self.leases.mac_for_ip(ip) {
                if let Some(&idx) = self.by_mac.get(&mac.to_ascii_lowercase()) {
                    return self.clients.get(idx);
                }
            }
        }
        None
    }

    /// Effective settings for one query, with global config as fallback.
    pub fn effective_settings(&self, ip: IpAddr, global: &FilteringConfig) -> EffectiveSettings {
        let global_settings = EffectiveSettings {
            client_name: None,
            filtering_enabled: global.filtering_enabled,
            safebrowsing_enabled: global.safebrowsing_enabled,
            parental_enabled: global.parental_enabled,
            safesearch_enabled: global.safesearch_enabled,
            blocked_services: global.blocked_services.clone(),
            tags: Vec::new(),
        };

        let Some(client) = self.manual_for(ip) else {
            return global_settings;
        };

        let mut effective = if client.settings.use_global_settings {
            global_settings
        } else {
            EffectiveSettings {
                client_name: None,
                filtering_enabled: client.settings.filtering_enabled,
                safebrowsing_enabled: client.settings.safebrowsing_enabled,
                parental_enabled: client.settings.parental_enabled,
                safesearch_enabled: client.settings.safesearch_enabled,
                blocked_services: Vec::new(),
                tags: Vec::new(),
            }
        };
        effective.client_name = Some(client.name.clone());
        effective.tags = client.tags.clone();
        if !client.settings.use_global_blocked_services {
            effective.blocked_services = client.settings.blocked_services.clone();
        } else if effective.blocked_services.is_empty() {
            effective.blocked_services = global.blocked_services.clone();
        }
        effective
    }

    /// Display name for logging/stats: manual > lease > hosts > rDNS cache.
    /// Never performs network I/O; [`ClientRegistry::store_rdns`] fills the
    /// cache from the handler's own PTR lookups.
    pub fn display_name(&self, ip: IpAddr, hosts: &HostsResolver) -> Option<String> {
        if let Some(client) = self.manual_for(ip) {
            return Some(client.name.clone());
        }
        if let Some(hostname) = self.leases.hostname_for_ip(ip) {
            return Some(hostname);
        }
        if let Some(name) = hosts.name_for_ip(ip) {
            return Some(name.to_string());
        }
        let mut cache = self.rdns_cache.lock().unwrap();
        if let Some((stored_at, name)) = cache.get(&ip) {
            if stored_at.elapsed() < RDNS_CACHE_TTL {
                return name.clone();
            }
            cache.pop(&ip);
        }
        None
    }

    /// Whether an rDNS lookup for `ip` would add information.
    pub fn wants_rdns(&self, ip: IpAddr, hosts: &HostsResolver) -> bool {
        if self.manual_for(ip).is_some()
            || self.leases.hostname_for_ip(ip).is_some()
            || hosts.name_for_ip(ip).is_some()
        {
            return false;
        }
        let mut cache = self.rdns_cache.lock().unwrap();
        match cache.get(&ip) {
            Some((stored_at, _)) => stored_at.elapsed() >= RDNS_CACHE_TTL,
            None => true,
        }
    }

    /// Record an rDNS result (including a negative one).
    pub fn store_rdns(&self, ip: IpAddr, name: Option<String>) {
        self.rdns_cache
            .lock()
            .unwrap()
            .put(ip, (Instant::now(), name));
    }
}

fn looks_like_mac(id: &str) -> bool {
    let parts: Vec<&str> = id.split(':').collect();
    parts.len() == 6 && parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_dns_application::ports::leases::NoLeases;
    use warden_dns_domain::ClientSettings;

    fn client(name: &str, ids: &[&str], settings: ClientSettings) -> ManualClient {
        ManualClient {
            name: name.to_string(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
            settings,
        }
    }

    #[test]
    fn test_global_fallback() {
        let registry = ClientRegistry::new(Vec::new(), Arc::new(NoLeases));
        let global = FilteringConfig {
            safebrowsing_enabled: true,
            ..Default::default()
        };
        let settings = registry.effective_settings("10.0.0.1".parse().unwrap(), &global);
        assert!(settings.safebrowsing_enabled);
        assert!(settings.client_name.is_none());
    }

    #[test]
    fn test_client_overrides_global() {
        let settings = ClientSettings {
            use_global_settings: false,
            filtering_enabled: false,
            ..Default::default()
        };
        let registry = ClientRegistry::new(
            vec![client("laptop", &["10.0.0.5"], settings)],
            Arc::new(NoLeases),
        );
        let global = FilteringConfig::default();

        let effective = registry.effective_settings("10.0.0.5".parse().unwrap(), &global);
        assert_eq!(effective.client_name.as_deref(), Some("laptop"));
        assert!(!effective.filtering_enabled);

        // Other sources still follow the global toggles.
        let other = registry.effective_settings("10.0.0.6".parse().unwrap(), &global);
        assert!(other.filtering_enabled);
    }

    #[test]
    fn test_more_specific_subnet_wins() {
        let registry = ClientRegistry::new(
            vec![
                client("lan", &["10.0.0.0/8"], ClientSettings::default()),
                client("host", &["10.1.2.3"], ClientSettings::default()),
            ],
            Arc::new(NoLeases),
        );
        let global = FilteringConfig::default();
        let effective = registry.effective_settings("10.1.2.3".parse().unwrap(), &global);
        assert_eq!(effective.client_name.as_deref(), Some("host"));
    }

    #[test]
    fn test_client_blocked_services_override() {
        let settings = ClientSettings {
            use_global_blocked_services: false,
            blocked_services: vec!["tiktok".to_string()],
            ..Default::default()
        };
        let registry = ClientRegistry::new(
            vec![client("kid", &["10.0.0.9"], settings)],
            Arc::new(NoLeases),
        );
        let global = FilteringConfig {
            blocked_services: vec!["facebook".to_string()],
            ..Default::default()
        };

        let kid = registry.effective_settings("10.0.0.9".parse().unwrap(), &global);
        assert_eq!(kid.blocked_services, vec!["tiktok".to_string()]);

        let other = registry.effective_settings("10.0.0.10".parse().unwrap(), &global);
        assert_eq!(other.blocked_services, vec!["facebook".to_string()]);
    }

    #[test]
    fn test_mac_matching_via_leases() {
        struct FixedLeases;
        impl LeaseLookup for FixedLeases {
            fn hostname_for_ip(&self, _ip: IpAddr) -> Option<String> {
                None
            }
            fn mac_for_ip(&self, ip: IpAddr) -> Option<String> {
                (ip == "10.0.0.77".parse::<IpAddr>().unwrap())
                    .then(|| "aa:bb:cc:dd:ee:ff".to_string())
            }
        }

        let registry = ClientRegistry::new(
            vec![client("phone", &["AA:BB:CC:DD:EE:FF"], ClientSettings::default())],
            Arc::new(FixedLeases),
        );
        let global = FilteringConfig::default();
        let effective = registry.effective_settings("10.0.0.77".parse().unwrap(), &global);
        assert_eq!(effective.client_name.as_deref(), Some("phone"));
    }

    #[test]
    fn test_rdns_cache() {
        let registry = ClientRegistry::new(Vec::new(), Arc::new(NoLeases));
        let hosts = HostsResolver::new(&[], "");
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(registry.wants_rdns(ip, &hosts));
        registry.store_rdns(ip, Some("workstation.lan".to_string()));
        assert!(!registry.wants_rdns(ip, &hosts));
        assert_eq!(
            registry.display_name(ip, &hosts).as_deref(),
            Some("workstation.lan")
        );
    }
}
