pub mod leases;
pub mod query_log;
pub mod rule_matcher;
pub mod safety;
pub mod stats;
pub mod upstream;

pub use leases::LeaseLookup;
pub use query_log::{
    FilteringStatus, QueryLogRecord, QueryLogStore, SearchCriteria, SearchResult, StringMatch,
};
pub use rule_matcher::RuleMatcher;
pub use safety::{SafetyOracle, SafetyVerdict};
pub use stats::{StatsObservation, StatsSink};
pub use upstream::{UpstreamAnswer, UpstreamExchanger};
