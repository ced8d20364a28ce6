use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid upstream spec '{0}': {1}")]
    InvalidUpstream(String, String),

    #[error("Invalid rewrite entry '{0}': {1}")]
    InvalidRewrite(String, String),

    #[error("Invalid DNS response: {0}")]
    InvalidDnsResponse(String),

    #[error("All upstreams failed: {0}")]
    AllUpstreamsFailed(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Query timeout")]
    QueryTimeout,

    #[error("Filter list fetch failed: {0}")]
    FilterFetchFailed(String),

    #[error("Query log error: {0}")]
    QueryLogError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for WardenError {
    fn from(e: std::io::Error) -> Self {
        WardenError::IoError(e.to_string())
    }
}
