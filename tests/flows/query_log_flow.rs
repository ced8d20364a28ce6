//! Query-log flows: every reply is logged, write-then-read ordering, and
//! search predicates over live traffic.

#[path = "../common/mod.rs"]
mod common;

use common::{a_record, TestServerBuilder};
use warden_dns_application::ports::{FilteringStatus, SearchCriteria, StringMatch};
use warden_dns_domain::{BlockingMode, RecordType};

#[tokio::test(flavor = "multi_thread")]
async fn test_every_reply_produces_one_log_entry() {
    let server = TestServerBuilder::new()
        .upstream("one.example", vec![a_record("one.example", "1.1.1.1")])
        .upstream("two.example", vec![a_record("two.example", "2.2.2.2")])
        .build();

    server.query("one.example", RecordType::A).await;
    server.query("two.example", RecordType::A).await;

    let result = server.search_log(SearchCriteria::default()).await;
    assert_eq!(result.entries.len(), 2);

    for entry in &result.entries {
        assert_eq!(entry.question.qtype, RecordType::A);
        assert!(!entry.answer.is_empty());
        assert_eq!(entry.upstream, "mock://upstream");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_by_substring_newest_first() {
    let server = TestServerBuilder::new()
        .upstream("a.test", vec![a_record("a.test", "1.1.1.1")])
        .upstream("b.test", vec![a_record("b.test", "2.2.2.2")])
        .upstream("other.example", vec![a_record("other.example", "3.3.3.3")])
        .build();

    server.query("a.test", RecordType::A).await;
    server.query("b.test", RecordType::A).await;
    server.query("other.example", RecordType::A).await;

    let result = server
        .search_log(SearchCriteria {
            search: StringMatch::parse("test"),
            limit: 10,
            ..Default::default()
        })
        .await;

    let hosts: Vec<&str> = result.entries.iter().map(|e| e.question.host.as_str()).collect();
    assert_eq!(hosts, ["b.test", "a.test"]);
    assert!(result.oldest.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exact_search_requires_full_match() {
    let server = TestServerBuilder::new()
        .upstream("a.test", vec![a_record("a.test", "1.1.1.1")])
        .upstream("aa.test", vec![a_record("aa.test", "2.2.2.2")])
        .build();

    server.query("a.test", RecordType::A).await;
    server.query("aa.test", RecordType::A).await;

    let result = server
        .search_log(SearchCriteria {
            search: StringMatch::parse("\"a.test\""),
            limit: 10,
            ..Default::default()
        })
        .await;
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].question.host, "a.test");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filtered_status_bucket() {
    let server = TestServerBuilder::new()
        .user_rules(&["||blocked.test^"])
        .blocking_mode(BlockingMode::Nxdomain)
        .upstream("clean.test", vec![a_record("clean.test", "1.1.1.1")])
        .build();

    server.query("clean.test", RecordType::A).await;
    server.query("blocked.test", RecordType::A).await;

    let filtered = server
        .search_log(SearchCriteria {
            status: FilteringStatus::Filtered,
            limit: 10,
            ..Default::default()
        })
        .await;
    assert_eq!(filtered.entries.len(), 1);
    assert_eq!(filtered.entries[0].question.host, "blocked.test");

    let processed = server
        .search_log(SearchCriteria {
            status: FilteringStatus::Processed,
            limit: 10,
            ..Default::default()
        })
        .await;
    assert_eq!(processed.entries.len(), 1);
    assert_eq!(processed.entries[0].question.host, "clean.test");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_older_than_pages_backward() {
    let server = TestServerBuilder::new()
        .upstream("a.test", vec![a_record("a.test", "1.1.1.1")])
        .upstream("b.test", vec![a_record("b.test", "2.2.2.2")])
        .build();

    server.query("a.test", RecordType::A).await;
    server.query("b.test", RecordType::A).await;

    let all = server
        .search_log(SearchCriteria {
            limit: 10,
            ..Default::default()
        })
        .await;
    let newest_ts = all.entries[0].timestamp;

    let page = server
        .search_log(SearchCriteria {
            older_than: Some(newest_ts),
            limit: 10,
            ..Default::default()
        })
        .await;
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].question.host, "a.test");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_elapsed_is_non_negative_and_question_matches() {
    let server = TestServerBuilder::new()
        .upstream("host.example", vec![a_record("host.example", "1.1.1.1")])
        .build();

    server.query("Host.Example.", RecordType::A).await;

    let result = server.search_log(SearchCriteria::default()).await;
    let entry = &result.entries[0];
    // Lower-cased, trailing dot trimmed.
    assert_eq!(entry.question.host, "host.example");
    assert_eq!(entry.question.qclass.to_string(), "IN");
}
