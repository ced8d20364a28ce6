//! Warden DNS Background Jobs
pub mod filter_refresh;
pub mod log_rotation;

pub use filter_refresh::FilterRefreshJob;
pub use log_rotation::LogRotationJob;
