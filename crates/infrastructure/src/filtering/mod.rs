pub mod access;
pub mod hosts;
pub mod manager;
pub mod rule_set;
pub mod rule_store;
pub mod rules;
pub mod safe_search;
pub mod safety;
pub mod services;
pub mod state;

pub use access::{AccessDecision, AccessGate};
pub use hosts::{HostsResolver, RewriteOutcome};
pub use manager::FilterManager;
pub use rule_set::RuleSet;
pub use rule_store::RuleStore;
pub use safe_search::SafeSearchTable;
pub use safety::SafetyServiceClient;
pub use services::BlockedServices;
pub use state::{FilteringState, StatePublisher};
