use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warden_dns_infrastructure::filtering::FilterManager;

/// Ticks the filter manager once a minute. The manager itself decides
/// which lists are due based on cache-file age and the configured update
/// interval.
pub struct FilterRefreshJob {
    manager: Arc<FilterManager>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl FilterRefreshJob {
    pub fn new(manager: Arc<FilterManager>) -> Self {
        Self {
            manager,
            interval_secs: 60,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.interval_secs,
            "Starting filter refresh job"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("FilterRefreshJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.manager.refresh_tick().await;
                    }
                }
            }
        });
    }
}
