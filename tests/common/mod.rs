pub mod fixtures;

pub use fixtures::{a_record, aaaa_record, cname_record, TestServer, TestServerBuilder};
