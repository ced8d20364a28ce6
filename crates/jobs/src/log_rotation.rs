use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warden_dns_application::ports::QueryLogStore;

/// Checks the query log's rotation boundary once a day.
pub struct LogRotationJob {
    store: Arc<dyn QueryLogStore>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl LogRotationJob {
    pub fn new(store: Arc<dyn QueryLogStore>) -> Self {
        Self {
            store,
            interval_secs: 86400,
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
            "Starting query log rotation job"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("LogRotationJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.store.rotate().await {
                            Ok(()) => info!("Query log rotation check completed"),
                            Err(e) => error!(error = %e, "Query log rotation failed"),
                        }
                    }
                }
            }
        });
    }
}
