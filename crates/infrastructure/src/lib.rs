//! Warden DNS Infrastructure Layer
//!
//! Concrete implementations behind the application ports: the filtering
//! engine, the upstream pool, the DNS server handler, the query-log store
//! and the statistics sink.
pub mod dns_wire;
pub mod filtering;
pub mod querylog;
pub mod server;
pub mod stats;
pub mod upstream;
