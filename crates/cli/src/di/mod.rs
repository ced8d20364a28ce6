//! Dependency wiring: builds the concrete component graph behind the
//! application ports and hands the assembled handler to the listeners.

use std::path::Path;
use std::sync::Arc;
use warden_dns_application::ports::leases::NoLeases;
use warden_dns_application::ports::QueryLogStore;
use warden_dns_domain::Config;
use warden_dns_infrastructure::filtering::safety::oracle_from_config;
use warden_dns_infrastructure::filtering::{FilterManager, FilteringState, StatePublisher};
use warden_dns_infrastructure::querylog::QueryLog;
use warden_dns_infrastructure::server::{ClientRegistry, WardenHandler};
use warden_dns_infrastructure::stats::InMemoryStats;
use warden_dns_infrastructure::upstream::{BootstrapResolver, UpstreamPool};

pub struct App {
    pub config: Config,
    pub handler: WardenHandler,
    pub manager: Arc<FilterManager>,
    pub querylog_store: Arc<dyn QueryLogStore>,
    pub stats: Arc<InMemoryStats>,
}

pub async fn build(config: Config, work_dir: &Path) -> anyhow::Result<App> {
    // Filtering state: an empty snapshot first, then the manager compiles
    // the real one from config plus whatever list content is cached.
    let publisher = Arc::new(StatePublisher::new(FilteringState::build(
        config.filtering.clone(),
        &config.access,
        Vec::new(),
        "",
    )));
    let manager = Arc::new(FilterManager::new(
        work_dir.join("data"),
        config.filtering.clone(),
        config.access.clone(),
        Arc::clone(&publisher),
    )?);
    manager.publish_initial().await?;

    // Upstream pool with bootstrap resolution for secure upstreams.
    let bootstrap = BootstrapResolver::new(&config.dns.bootstrap_dns);
    let upstream = Arc::new(UpstreamPool::new(&config.dns, &bootstrap).await?);

    // Safety oracles.
    let safebrowsing = oracle_from_config(
        &config.filtering.safebrowsing_zone,
        &config.filtering.safety_upstream,
    );
    let parental = oracle_from_config(
        &config.filtering.parental_zone,
        &config.filtering.safety_upstream,
    );

    // Query log and statistics.
    let querylog = QueryLog::new(work_dir, config.querylog.clone());
    let querylog_store: Arc<dyn QueryLogStore> = Arc::new(querylog);
    let stats = Arc::new(InMemoryStats::new());

    // Clients. The embedded DHCP server is an external collaborator; its
    // lease lookup is absent in the standalone binary.
    let clients = Arc::new(ClientRegistry::new(config.clients.clone(), Arc::new(NoLeases)));

    let handler = WardenHandler::new(
        config.dns.clone(),
        publisher,
        upstream,
        safebrowsing,
        parental,
        Arc::clone(&querylog_store),
        stats.clone(),
        clients,
    );

    Ok(App {
        config,
        handler,
        manager,
        querylog_store,
        stats,
    })
}
