use super::rule_set::RuleSet;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;
use warden_dns_domain::{FilterVerdict, RecordType};

/// Built-in service bundles: service name → blocking rules.
///
/// Kept deliberately small; the control plane can extend the set at
/// reconfigure time via [`BlockedServices::with_definitions`].
const BUILTIN_SERVICES: &[(&str, &[&str])] = &[
    ("facebook", &[
        "||facebook.com^",
        "||facebook.net^",
        "||fbcdn.net^",
        "||fb.com^",
        "||messenger.com^",
    ]),
    ("instagram", &["||instagram.com^", "||cdninstagram.com^"]),
    ("whatsapp", &["||whatsapp.com^", "||whatsapp.net^", "||wa.me^"]),
    ("tiktok", &["||tiktok.com^", "||tiktokcdn.com^", "||musical.ly^"]),
    ("twitter", &["||twitter.com^", "||twimg.com^", "||t.co^", "||x.com^"]),
    ("youtube", &[
        "||youtube.com^",
        "||ytimg.com^",
        "||googlevideo.com^",
        "||youtu.be^",
        "||youtube-nocookie.com^",
    ]),
    ("netflix", &["||netflix.com^", "||nflxvideo.net^", "||nflximg.net^"]),
    ("twitch", &["||twitch.tv^", "||ttvnw.net^", "||jtvnw.net^"]),
    ("discord", &["||discord.com^", "||discord.gg^", "||discordapp.com^"]),
    ("snapchat", &["||snapchat.com^", "||sc-cdn.net^"]),
    ("reddit", &["||reddit.com^", "||redd.it^", "||redditmedia.com^"]),
    ("steam", &["||steampowered.com^", "||steamcommunity.com^", "||steamstatic.com^"]),
];

/// Named rule bundles blocking whole third-party properties.
pub struct BlockedServices {
    services: FxHashMap<String, Arc<RuleSet>>,
}

impl BlockedServices {
    pub fn builtin() -> Self {
        Self::with_definitions(
            BUILTIN_SERVICES
                .iter()
                .map(|(name, rules)| (name.to_string(), rules.iter().map(|r| r.to_string()).collect())),
        )
    }

    pub fn with_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut services = FxHashMap::default();
        for (name, rules) in definitions {
            let set = RuleSet::compile_lines(&rules);
            debug!(service = %name, rules = set.len(), "Compiled blocked-service bundle");
            services.insert(name, Arc::new(set));
        }
        Self { services }
    }

    pub fn known(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Match `host` against the effective service set. The first matching
    /// service in `enabled` order wins.
    pub fn match_host(
        &self,
        host: &str,
        qtype: RecordType,
        enabled: &[String],
    ) -> FilterVerdict {
        for name in enabled {
            let Some(set) = self.services.get(name) else {
                continue;
            };
            if !set.matches(host, qtype, &[]).is_empty() {
                return FilterVerdict::BlockedByService {
                    service: Arc::from(name.as_str()),
                };
            }
        }
        FilterVerdict::NotFiltered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_service_blocks() {
        let services = BlockedServices::builtin();
        let enabled = vec!["facebook".to_string()];
        let verdict = services.match_host("www.facebook.com", RecordType::A, &enabled);
        assert!(matches!(
            verdict,
            FilterVerdict::BlockedByService { ref service } if &**service == "facebook"
        ));
    }

    #[test]
    fn test_disabled_service_passes() {
        let services = BlockedServices::builtin();
        assert_eq!(
            services.match_host("www.facebook.com", RecordType::A, &[]),
            FilterVerdict::NotFiltered
        );
    }

    #[test]
    fn test_unknown_service_ignored() {
        let services = BlockedServices::builtin();
        let enabled = vec!["does-not-exist".to_string()];
        assert_eq!(
            services.match_host("www.facebook.com", RecordType::A, &enabled),
            FilterVerdict::NotFiltered
        );
    }
}
