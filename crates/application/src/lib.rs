//! Warden DNS Application Layer
//!
//! Ports consumed by the DNS server pipeline and the use cases the control
//! surface calls into. Implementations live in the infrastructure layer and
//! are injected at wiring time.
pub mod ports;
pub mod use_cases;
