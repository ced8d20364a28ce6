pub mod access;
pub mod dns;
pub mod filtering;
pub mod querylog;
pub mod tls;

pub use access::AccessConfig;
pub use dns::{DnsConfig, UpstreamMode};
pub use filtering::FilteringConfig;
pub use querylog::{QueryLogConfig, RetentionDays};
pub use tls::TlsConfig;

use crate::client::ManualClient;
use serde::{Deserialize, Serialize};

/// Root configuration consumed by the engine.
///
/// File parsing and schema migration live outside the core; this struct is
/// the already-validated shape handed to the wiring layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(default)]
    pub querylog: QueryLogConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub clients: Vec<ManualClient>,
}
