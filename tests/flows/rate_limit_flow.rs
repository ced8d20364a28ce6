//! Rate-limit flows: UDP is capped per source, TCP is not.

#[path = "../common/mod.rs"]
mod common;

use common::{a_record, TestServerBuilder};
use std::net::IpAddr;
use warden_dns_domain::RecordType;
use warden_dns_infrastructure::server::handler::HandleOutcome;

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_exceeding_limit_is_dropped() {
    let server = TestServerBuilder::new()
        .ratelimit(20)
        .upstream("host.example", vec![a_record("host.example", "1.1.1.1")])
        .build();

    let src: IpAddr = "192.168.1.50".parse().unwrap();
    let mut answered = 0;
    for _ in 0..100 {
        match server.query_from("host.example", RecordType::A, src, true).await {
            HandleOutcome::Reply(_) => answered += 1,
            HandleOutcome::Drop => {}
        }
    }
    assert!(answered <= 20, "answered {} > 20", answered);
    assert!(answered > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tcp_bypasses_limit() {
    let server = TestServerBuilder::new()
        .ratelimit(20)
        .upstream("host.example", vec![a_record("host.example", "1.1.1.1")])
        .build();

    let src: IpAddr = "192.168.1.50".parse().unwrap();
    let mut answered = 0;
    for _ in 0..100 {
        if let HandleOutcome::Reply(_) =
            server.query_from("host.example", RecordType::A, src, false).await
        {
            answered += 1;
        }
    }
    assert_eq!(answered, 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_limit_is_per_source() {
    let server = TestServerBuilder::new()
        .ratelimit(5)
        .upstream("host.example", vec![a_record("host.example", "1.1.1.1")])
        .build();

    let first: IpAddr = "192.168.1.50".parse().unwrap();
    for _ in 0..10 {
        server.query_from("host.example", RecordType::A, first, true).await;
    }

    // A different source still gets answered.
    let second: IpAddr = "192.168.1.51".parse().unwrap();
    assert!(matches!(
        server.query_from("host.example", RecordType::A, second, true).await,
        HandleOutcome::Reply(_)
    ));
}
