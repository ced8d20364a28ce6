pub mod bootstrap;
pub mod pool;
pub mod spec;
pub mod transport;

pub use bootstrap::BootstrapResolver;
pub use pool::UpstreamPool;
pub use spec::{UpstreamScheme, UpstreamSpec};
