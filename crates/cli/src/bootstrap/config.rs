use std::path::Path;
use tracing::{info, warn};
use warden_dns_domain::Config;

/// Load the TOML configuration. A missing file yields the defaults; an
/// unparsable one is fatal, because silently running unfiltered would be
/// worse than not starting.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "No config file; using defaults");
            return Ok(Config::default());
        }
        Err(e) => return Err(anyhow::anyhow!("cannot read {}: {}", path.display(), e)),
    };

    let config: Config = toml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;

    info!(
        upstreams = config.dns.upstream_dns.len(),
        filters = config.filtering.filters.len(),
        "Configuration loaded"
    );
    Ok(config)
}
