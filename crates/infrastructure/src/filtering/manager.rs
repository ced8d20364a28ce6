use super::rule_set::RuleSet;
use super::state::{FilteringState, StatePublisher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_dns_domain::{AccessConfig, FilterList, FilteringConfig, WardenError};

/// Fetches remote filter lists, keeps the on-disk cache fresh, and
/// publishes a new filtering state when anything changed.
///
/// Downloads run sequentially to cap outbound bandwidth. A failed fetch
/// keeps the cached copy and is retried on the next tick.
pub struct FilterManager {
    data_dir: PathBuf,
    http: reqwest::Client,
    publisher: Arc<StatePublisher>,
    config: Mutex<ManagedConfig>,
}

struct ManagedConfig {
    filtering: FilteringConfig,
    access: AccessConfig,
}

impl FilterManager {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        filtering: FilteringConfig,
        access: AccessConfig,
        publisher: Arc<StatePublisher>,
    ) -> Result<Self, WardenError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("filters"))?;

        let http = reqwest::Client::builder()
            .user_agent("warden-dns (filter-sync)")
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| WardenError::FilterFetchFailed(e.to_string()))?;

        let mut filtering = filtering;
        dedup_list_urls(&mut filtering.filters);

        Ok(Self {
            data_dir,
            http,
            publisher,
            config: Mutex::new(ManagedConfig { filtering, access }),
        })
    }

    fn cache_path(&self, list: &FilterList) -> PathBuf {
        self.data_dir.join("filters").join(list.cache_file_name())
    }

    /// Build the initial state from whatever is cached on disk and publish
    /// it. Missing cache files are fetched on the first tick, not here.
    pub async fn publish_initial(&self) -> Result<(), WardenError> {
        let state = {
            let config = self.config.lock().await;
            self.build_state(&config)
        };
        self.publisher.publish(state).await;
        Ok(())
    }

    /// One scheduler tick: refresh every enabled list whose cache is older
    /// than the update interval, then republish if anything changed.
    pub async fn refresh_tick(&self) {
        let mut config = self.config.lock().await;
        let interval_hours = config.filtering.normalized_update_interval();
        if interval_hours == 0 {
            return;
        }
        let max_age = Duration::from_secs(u64::from(interval_hours) * 3600);

        let due: Vec<i64> = config
            .filtering
            .filters
            .iter()
            .filter(|list| list.enabled && !list.is_local())
            .filter(|list| self.cache_age(list).map_or(true, |age| age > max_age))
            .map(|list| list.id)
            .collect();

        if due.is_empty() {
            return;
        }
        debug!(due = due.len(), "Filter lists due for refresh");

        let mut changed = false;
        for id in due {
            let Some(list) = config.filtering.filters.iter_mut().find(|l| l.id == id) else {
                continue;
            };
            match self.refresh_list(list).await {
                Ok(true) => changed = true,
                Ok(false) => {}
                Err(e) => {
                    warn!(list_id = id, url = %list.url, error = %e, "Filter list refresh failed; keeping cached copy");
                }
            }
        }

        if changed {
            let state = self.build_state(&config);
            drop(config);
            self.publisher.publish(state).await;
            info!("Filtering state republished after list refresh");
        }
    }

    /// Force-refresh every enabled remote list regardless of age.
    pub async fn refresh_all(&self) -> Result<(), WardenError> {
        let mut config = self.config.lock().await;
        let mut changed = false;
        let ids: Vec<i64> = config
            .filtering
            .filters
            .iter()
            .filter(|l| l.enabled && !l.is_local())
            .map(|l| l.id)
            .collect();
        for id in ids {
            if let Some(list) = config.filtering.filters.iter_mut().find(|l| l.id == id) {
                match self.refresh_list(list).await {
                    Ok(true) => changed = true,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(list_id = id, error = %e, "Filter list refresh failed");
                    }
                }
            }
        }
        if changed {
            let state = self.build_state(&config);
            drop(config);
            self.publisher.publish(state).await;
        }
        Ok(())
    }

    fn cache_age(&self, list: &FilterList) -> Option<Duration> {
        let meta = std::fs::metadata(self.cache_path(list)).ok()?;
        let mtime = meta.modified().ok()?;
        SystemTime::now().duration_since(mtime).ok()
    }

    /// Download one list. Returns `Ok(true)` when the rule sequence
    /// actually changed and the cache file was replaced.
    async fn refresh_list(&self, list: &mut FilterList) -> Result<bool, WardenError> {
        let response = self
            .http
            .get(&list.url)
            .send()
            .await
            .map_err(|e| WardenError::FilterFetchFailed(e.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(WardenError::FilterFetchFailed(format!(
                "HTTP {} for {}",
                response.status().as_u16(),
                list.url
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && !content_type.starts_with("text/plain") {
            return Err(WardenError::FilterFetchFailed(format!(
                "unexpected content type '{}' for {}",
                content_type, list.url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WardenError::FilterFetchFailed(e.to_string()))?;

        let fresh = RuleSet::compile(&body);
        let path = self.cache_path(list);

        let unchanged = match std::fs::read_to_string(&path) {
            Ok(cached) => {
                let cached_set = RuleSet::compile(&cached);
                cached_set.rule_texts().eq(fresh.rule_texts())
            }
            Err(_) => false,
        };

        // Metadata refreshes either way; mtime doubles as the fetch clock.
        list.rule_count = fresh.len();
        if let Some(title) = extract_title(&body) {
            list.name = title;
        }
        list.last_updated = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if unchanged {
            // Touch the cache so the next tick sees a fresh mtime.
            touch(&path)?;
            debug!(list_id = list.id, "Filter list unchanged");
            return Ok(false);
        }

        // Write-then-rename keeps readers off half-written files.
        let tmp = path.with_extension("txt.tmp");
        std::fs::write(&tmp, &body)?;
        std::fs::rename(&tmp, &path)?;

        info!(
            list_id = list.id,
            rules = list.rule_count,
            name = %list.name,
            "Filter list updated"
        );
        Ok(true)
    }

    /// Compile the full state from config plus cached list files.
    fn build_state(&self, config: &ManagedConfig) -> FilteringState {
        let mut list_texts = Vec::new();
        for list in &config.filtering.filters {
            if !list.enabled {
                continue;
            }
            let path = if list.is_local() {
                PathBuf::from(&list.url)
            } else {
                self.cache_path(list)
            };
            match std::fs::read_to_string(&path) {
                Ok(text) => list_texts.push((list.id, text)),
                Err(e) => {
                    debug!(list_id = list.id, path = %path.display(), error = %e, "No cached content for list");
                }
            }
        }

        let etc_hosts = std::fs::read_to_string("/etc/hosts").unwrap_or_default();
        FilteringState::build(
            config.filtering.clone(),
            &config.access,
            list_texts,
            &etc_hosts,
        )
    }

    /// Current list metadata (name, rule count, last update).
    pub async fn lists(&self) -> Vec<FilterList> {
        self.config.lock().await.filtering.filters.clone()
    }
}

/// First `! Title:` line of a list, if present.
fn extract_title(body: &str) -> Option<String> {
    for line in body.lines().take(50) {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("! Title:") {
            let title = rest.trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

/// Duplicate URLs are dropped silently at load; the first occurrence wins.
fn dedup_list_urls(filters: &mut Vec<FilterList>) {
    let mut seen: HashSet<String> = HashSet::new();
    filters.retain(|list| seen.insert(list.url.clone()));
}

fn touch(path: &Path) -> Result<(), WardenError> {
    let file = std::fs::File::options().append(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title() {
        let body = "! Checksum: x\n! Title: My Block List\n||ads.example^\n";
        assert_eq!(extract_title(body), Some("My Block List".to_string()));
        assert_eq!(extract_title("||ads.example^\n"), None);
    }

    #[test]
    fn test_dedup_list_urls() {
        let mut filters = vec![
            FilterList {
                id: 1,
                enabled: true,
                url: "https://a.example/list.txt".into(),
                name: String::new(),
                rule_count: 0,
                last_updated: 0,
            },
            FilterList {
                id: 2,
                enabled: true,
                url: "https://a.example/list.txt".into(),
                name: String::new(),
                rule_count: 0,
                last_updated: 0,
            },
            FilterList {
                id: 3,
                enabled: true,
                url: "https://b.example/list.txt".into(),
                name: String::new(),
                rule_count: 0,
                last_updated: 0,
            },
        ];
        dedup_list_urls(&mut filters);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].id, 1);
        assert_eq!(filters[1].id, 3);
    }

    #[tokio::test]
    async fn test_build_state_reads_local_lists() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("local.txt");
        std::fs::write(&list_path, "||ads.example^\n").unwrap();

        let filtering = FilteringConfig {
            filters: vec![FilterList {
                id: 7,
                enabled: true,
                url: list_path.to_string_lossy().into_owned(),
                name: String::new(),
                rule_count: 0,
                last_updated: 0,
            }],
            ..Default::default()
        };

        let publisher = Arc::new(StatePublisher::new(FilteringState::build(
            FilteringConfig::default(),
            &AccessConfig::default(),
            Vec::new(),
            "",
        )));
        let manager = FilterManager::new(
            dir.path().join("data"),
            filtering,
            AccessConfig::default(),
            Arc::clone(&publisher),
        )
        .unwrap();

        manager.publish_initial().await.unwrap();
        assert_eq!(publisher.load().rule_store.total_rules(), 1);
    }
}
