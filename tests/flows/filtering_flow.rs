//! Decision-pipeline flows: rule blocking, rewrites, safe search,
//! safety services and the post-response re-check.

#[path = "../common/mod.rs"]
mod common;

use common::{a_record, aaaa_record, cname_record, TestServerBuilder};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RData;
use warden_dns_application::ports::{SafetyVerdict, SearchCriteria};
use warden_dns_domain::{AccessConfig, BlockingMode, FilterVerdict, RecordType};
use warden_dns_infrastructure::server::handler::{HandleOutcome, HandledQuery};

fn reply(outcome: HandleOutcome) -> HandledQuery {
    match outcome {
        HandleOutcome::Reply(handled) => handled,
        HandleOutcome::Drop => panic!("query was dropped"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_adblock_rule_blocks_with_nxdomain() {
    let server = TestServerBuilder::new()
        .user_rules(&["||ads.example.^"])
        .blocking_mode(BlockingMode::Nxdomain)
        .build();

    let handled = reply(server.query("ads.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
    assert!(handled.answers.is_empty());
    assert!(matches!(
        handled.verdict,
        FilterVerdict::BlockedByRule { list_id: 0, .. }
    ));

    // The log entry carries the rule and list id.
    let result = server.search_log(SearchCriteria::default()).await;
    assert_eq!(result.entries.len(), 1);
    let entry = &result.entries[0];
    assert_eq!(entry.question.host, "ads.example");
    assert_eq!(entry.reason.code(), 3);
    assert_eq!(entry.rule.as_deref(), Some("||ads.example.^"));

    // Nothing went upstream.
    assert_eq!(server.upstream_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hosts_rule_answers_rule_ip_with_ttl_10() {
    let server = TestServerBuilder::new()
        .user_rules(&["0.0.0.0 tracker.example"])
        .blocking_mode(BlockingMode::Default)
        .build();

    let handled = reply(server.query("tracker.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert_eq!(handled.answers.len(), 1);
    assert_eq!(handled.answers[0].data().to_string(), "0.0.0.0");
    assert_eq!(handled.answers[0].ttl(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allow_rule_wins_and_resolves_upstream() {
    let server = TestServerBuilder::new()
        .user_rules(&["||good.example^", "@@||good.example^"])
        .upstream("good.example", vec![a_record("good.example", "93.184.216.34")])
        .build();

    let handled = reply(server.query("good.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert_eq!(handled.answers.len(), 1);
    assert!(matches!(handled.verdict, FilterVerdict::Allowed { .. }));
    assert_eq!(handled.upstream, "mock://upstream");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cname_rewrite_chain() {
    let server = TestServerBuilder::new()
        .rewrites(&[("sub.host.com", "host.com"), ("host.com", "1.2.3.4")])
        .build();

    let handled = reply(server.query("sub.host.com", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert_eq!(handled.answers.len(), 2);

    match handled.answers[0].data() {
        RData::CNAME(cname) => assert_eq!(cname.0.to_string(), "host.com."),
        other => panic!("expected CNAME first, got {:?}", other),
    }
    match handled.answers[1].data() {
        RData::A(a) => assert_eq!(a.0.to_string(), "1.2.3.4"),
        other => panic!("expected A second, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rewrite_cycle_falls_back_to_upstream() {
    let server = TestServerBuilder::new()
        .rewrites(&[("a.example", "b.example"), ("b.example", "a.example")])
        .upstream("a.example", vec![a_record("a.example", "5.6.7.8")])
        .build();

    let handled = reply(server.query("a.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert_eq!(handled.answers.len(), 1);
    assert_eq!(handled.answers[0].data().to_string(), "5.6.7.8");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rewrite_aaaa_on_v4_target_is_empty_success() {
    let server = TestServerBuilder::new()
        .rewrites(&[("host.com", "1.2.3.4")])
        .build();

    let handled = reply(server.query("host.com", RecordType::AAAA).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert!(handled.answers.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_safe_search_rewrites_google() {
    let server = TestServerBuilder::new().safesearch(true).build();

    let handled = reply(server.query("www.google.com", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert!(matches!(handled.verdict, FilterVerdict::SafeSearch { .. }));

    let addresses: Vec<String> = handled
        .answers
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(a.0.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(addresses, vec!["216.239.38.120".to_string()]);

    let result = server.search_log(SearchCriteria::default()).await;
    assert_eq!(result.entries[0].reason.code(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_safebrowsing_blocks_when_oracle_says_so() {
    let server = TestServerBuilder::new()
        .safebrowsing(SafetyVerdict::Blocked)
        .blocking_mode(BlockingMode::Nxdomain)
        .build();

    let handled = reply(server.query("malware.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
    assert_eq!(handled.verdict, FilterVerdict::BlockedBySafeBrowsing);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_safebrowsing_unknown_does_not_block() {
    let server = TestServerBuilder::new()
        .safebrowsing(SafetyVerdict::Unknown)
        .upstream("site.example", vec![a_record("site.example", "9.9.9.9")])
        .build();

    let handled = reply(server.query("site.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert_eq!(handled.answers.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocked_service_match() {
    let server = TestServerBuilder::new()
        .blocked_services(&["facebook"])
        .blocking_mode(BlockingMode::Nxdomain)
        .build();

    let handled = reply(server.query("www.facebook.com", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
    assert!(matches!(
        handled.verdict,
        FilterVerdict::BlockedByService { ref service } if &**service == "facebook"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_post_response_cname_recheck_blocks() {
    // The question name is clean, but the upstream answer walks through a
    // blocked CNAME target.
    let server = TestServerBuilder::new()
        .user_rules(&["||evil-cdn.example^"])
        .blocking_mode(BlockingMode::Nxdomain)
        .upstream(
            "innocent.example",
            vec![
                cname_record("innocent.example", "evil-cdn.example"),
                a_record("evil-cdn.example", "6.6.6.6"),
            ],
        )
        .build();

    let handled = reply(server.query("innocent.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
    assert!(handled.orig_answer.is_some());
    assert!(matches!(handled.verdict, FilterVerdict::BlockedByRule { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refuse_any_returns_notimp() {
    let server = TestServerBuilder::new().refuse_any().build();
    let handled = reply(server.query("example.com", RecordType::ANY).await);
    assert_eq!(handled.code, ResponseCode::NotImp);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disable_ipv6_answers_aaaa_empty() {
    let server = TestServerBuilder::new()
        .disable_ipv6()
        .upstream("host.example", vec![a_record("host.example", "1.1.1.1")])
        .build();

    let handled = reply(server.query("host.example", RecordType::AAAA).await);
    assert_eq!(handled.code, ResponseCode::NoError);
    assert!(handled.answers.is_empty());
    // And nothing was forwarded for it.
    assert_eq!(server.upstream_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disable_ipv6_strips_aaaa_from_answers() {
    let server = TestServerBuilder::new()
        .disable_ipv6()
        .upstream(
            "dual.example",
            vec![
                a_record("dual.example", "1.1.1.1"),
                aaaa_record("dual.example", "2001:db8::1"),
            ],
        )
        .build();

    let handled = reply(server.query("dual.example", RecordType::A).await);
    assert_eq!(handled.answers.len(), 1);
    assert_eq!(handled.answers[0].data().to_string(), "1.1.1.1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_denied_client_is_dropped() {
    let server = TestServerBuilder::new()
        .access(AccessConfig {
            disallowed_clients: vec!["10.66.0.0/16".to_string()],
            ..Default::default()
        })
        .build();

    let outcome = server
        .query_from("example.com", RecordType::A, "10.66.1.2".parse().unwrap(), false)
        .await;
    assert!(matches!(outcome, HandleOutcome::Drop));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocked_host_wildcard() {
    let server = TestServerBuilder::new()
        .access(AccessConfig {
            blocked_hosts: vec!["*.honeypot.example".to_string()],
            ..Default::default()
        })
        .blocking_mode(BlockingMode::Nxdomain)
        .build();

    let handled = reply(server.query("x.honeypot.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_negative_upstream_answer_passes_through() {
    let server = TestServerBuilder::new().build();
    let handled = reply(server.query("nonexistent.example", RecordType::A).await);
    assert_eq!(handled.code, ResponseCode::NXDomain);
    assert!(handled.answers.is_empty());
}
