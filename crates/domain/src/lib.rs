//! Warden DNS Domain Layer
pub mod blocking;
pub mod client;
pub mod config;
pub mod errors;
pub mod filter_list;
pub mod question;
pub mod rewrite;
pub mod subnet;
pub mod verdict;

pub use blocking::BlockingMode;
pub use client::{ClientSettings, ManualClient};
pub use config::{
    AccessConfig, Config, DnsConfig, FilteringConfig, QueryLogConfig, RetentionDays, TlsConfig,
    UpstreamMode,
};
pub use errors::WardenError;
pub use filter_list::FilterList;
pub use question::{ClientProtocol, DnsQuestion, RecordClass, RecordType};
pub use rewrite::{RewriteEntry, RewriteTarget};
pub use subnet::SubnetMatcher;
pub use verdict::{FilterReason, FilterVerdict, RewriteAnswer};
