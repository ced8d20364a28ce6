use super::access::AccessGate;
use super::hosts::HostsResolver;
use super::rule_store::RuleStore;
use super::safe_search::SafeSearchTable;
use super::services::BlockedServices;
use arc_swap::ArcSwap;
use std::sync::Arc;
use warden_dns_domain::{AccessConfig, FilteringConfig};

/// One immutable snapshot of everything the decision pipeline consults.
///
/// Workers load the snapshot once per query and keep it until the reply is
/// sent; reconfiguration builds a fresh snapshot and swaps the pointer, so
/// in-flight queries always see a consistent state.
pub struct FilteringState {
    pub config: FilteringConfig,
    pub rule_store: Arc<RuleStore>,
    pub hosts: Arc<HostsResolver>,
    pub access: Arc<AccessGate>,
    pub services: Arc<BlockedServices>,
    pub safe_search: Arc<SafeSearchTable>,
}

impl FilteringState {
    /// Assemble a snapshot from configuration plus the cached list texts
    /// the manager read from disk.
    pub fn build(
        filtering: FilteringConfig,
        access: &AccessConfig,
        list_texts: Vec<(i64, String)>,
        etc_hosts: &str,
    ) -> Self {
        let mut sets = Vec::with_capacity(list_texts.len() + 1);
        if !filtering.user_rules.is_empty() {
            sets.push((
                warden_dns_domain::FilterList::USER_LIST_ID,
                Arc::new(super::rule_set::RuleSet::compile_lines(&filtering.user_rules)),
            ));
        }
        for (id, text) in list_texts {
            sets.push((id, Arc::new(super::rule_set::RuleSet::compile(&text))));
        }

        Self {
            hosts: Arc::new(HostsResolver::new(&filtering.rewrites, etc_hosts)),
            access: Arc::new(AccessGate::new(access)),
            services: Arc::new(BlockedServices::builtin()),
            safe_search: Arc::new(SafeSearchTable::new()),
            rule_store: Arc::new(RuleStore::new(sets)),
            config: filtering,
        }
    }
}

/// Copy-on-publish holder for the filtering state.
///
/// Readers pay one atomic pointer load; writers serialize on a mutex and
/// publish with a single swap, never blocking DNS I/O.
pub struct StatePublisher {
    current: ArcSwap<FilteringState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl StatePublisher {
    pub fn new(initial: FilteringState) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot for one query.
    pub fn load(&self) -> Arc<FilteringState> {
        self.current.load_full()
    }

    /// Publish a new snapshot. The guard only covers the swap itself.
    pub async fn publish(&self, state: FilteringState) {
        let _guard = self.write_lock.lock().await;
        self.current.store(Arc::new(state));
    }
}
