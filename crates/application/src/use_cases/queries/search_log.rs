use crate::ports::{QueryLogStore, SearchCriteria, SearchResult};
use std::sync::Arc;
use warden_dns_domain::WardenError;

const MAX_LIMIT: usize = 500;
const DEFAULT_LIMIT: usize = 100;

/// Interactive query-log retrieval with limit clamping.
pub struct SearchQueryLogUseCase {
    store: Arc<dyn QueryLogStore>,
}

impl SearchQueryLogUseCase {
    pub fn new(store: Arc<dyn QueryLogStore>) -> Self {
        Self { store }
    }

    pub async fn execute(&self, mut criteria: SearchCriteria) -> Result<SearchResult, WardenError> {
        if criteria.limit == 0 {
            criteria.limit = DEFAULT_LIMIT;
        }
        criteria.limit = criteria.limit.min(MAX_LIMIT);
        self.store.search(criteria).await
    }
}
