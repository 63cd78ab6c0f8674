use std::sync::Arc;
use std::time::Duration;

use edge_purge::http::{HttpResponse, MockHttpClient};
use edge_purge::logging::{LogLevel, Logger, RecordingSink};
use edge_purge::{
    ApiResponse, CloudflareClient, Credentials, FlushOutcome, InMemoryQueueStore, PurgeError,
    PurgeHooks, PurgeInput, PurgeType, QueueStore, RawPurgeInput, ResponseInfo,
};
use tokio_util::sync::CancellationToken;

const PURGE_KEY: &str = "POST /client/v4/zones/zone-1/purge_cache";
const OK_BODY: &str = r#"{"success":true,"errors":[],"messages":[],"result":{"id":"zone-1"}}"#;

struct Pipeline {
    hooks: PurgeHooks<InMemoryQueueStore, MockHttpClient>,
    store: Arc<InMemoryQueueStore>,
    http: Arc<MockHttpClient>,
    sink: RecordingSink,
}

fn pipeline() -> Pipeline {
    let store = Arc::new(InMemoryQueueStore::new());
    let http = Arc::new(MockHttpClient::new());
    let client = Arc::new(CloudflareClient::with_client(
        Credentials::new("zone-1", "ops@example.com", "key-123"),
        http.clone(),
    ));
    let sink = RecordingSink::new();
    let logger = Logger::new(LogLevel::Debug, Arc::new(sink.clone()));
    Pipeline {
        hooks: PurgeHooks::new(store.clone(), client, logger),
        store,
        http,
        sink,
    }
}

async fn wait_for_calls(http: &MockHttpClient, count: usize) {
    for _ in 0..100 {
        if http.call_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} calls, saw {}", http.call_count());
}

#[test_log::test(tokio::test)]
async fn test_process_queue_on_empty_store_makes_no_calls() {
    let p = pipeline();

    let purged = p.hooks.process_queue().await.unwrap();

    assert!(purged.is_empty());
    assert_eq!(p.http.call_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_queue_then_process_end_to_end() {
    let p = pipeline();
    let report = p
        .hooks
        .queue_many(vec![
            RawPurgeInput::new("file", "https://www.example.com/a"),
            RawPurgeInput::new("tag", "b"),
            RawPurgeInput::new("file", "https://www.example.com/c"),
            RawPurgeInput::new("host", "https://host1.example.com/path"),
        ])
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.rejected.len(), 1);

    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));
    let purged = p.hooks.process_queue().await.unwrap();

    assert_eq!(purged.len(), 3);
    assert!(p.store.is_empty());
    let calls = p.http.get_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].json(),
        serde_json::json!({
            "files": ["https://www.example.com/a", "https://www.example.com/c"],
            "tags": ["b"]
        })
    );
}

#[test_log::test(tokio::test)]
async fn test_rows_inserted_during_purge_survive() {
    let p = pipeline();
    p.store.insert(PurgeInput::tag("first")).await.unwrap();
    p.store.insert(PurgeInput::file("https://www.example.com/first")).await.unwrap();
    let trigger = p
        .http
        .add_response_with_trigger(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));

    let processor = p.hooks.processor();
    let handle = tokio::spawn(async move { processor.process_queue().await });

    wait_for_calls(&p.http, 1).await;
    p.store.insert(PurgeInput::tag("late")).await.unwrap();
    trigger.send(()).unwrap();

    let purged = handle.await.unwrap().unwrap();

    assert_eq!(purged.len(), 2);
    let remaining = p.store.all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, PurgeType::Tag);
    assert_eq!(remaining[0].content, "late");
}

#[test_log::test(tokio::test)]
async fn test_rate_limit_keeps_rows_and_reports_retry() {
    let p = pipeline();
    for i in 0..3 {
        p.store.insert(PurgeInput::tag(format!("tag-{i}"))).await.unwrap();
    }
    let before = p.store.all().await.unwrap();
    p.http.add_response(
        PURGE_KEY,
        Ok(HttpResponse::new(429, "{}").with_header("Retry-After", "120")),
    );

    let err = p.hooks.process_queue().await.unwrap_err();
    let response = ApiResponse::from_error(&err);

    assert!(!response.is_success());
    assert!(response.messages().contains(&ResponseInfo::new("retry", 120i64)));
    assert_eq!(p.store.all().await.unwrap(), before);
}

#[test_log::test(tokio::test)]
async fn test_stale_queue_after_delete_failure() {
    let p = pipeline();
    p.store.insert(PurgeInput::tag("news")).await.unwrap();
    p.store.fail_deletes(true);
    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));

    let err = p.hooks.process_queue().await.unwrap_err();

    assert!(matches!(err, PurgeError::StaleQueue { .. }));
    let errors = p.sink.at(LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].context["code"], "purge_queue_error");

    // The next drain purges the same rows again and clears them.
    p.store.fail_deletes(false);
    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));
    let purged = p.hooks.process_queue().await.unwrap();
    assert_eq!(purged.len(), 1);
    assert!(p.store.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_accumulator_queues_then_processor_drains() {
    let p = pipeline();
    let mut acc = p.hooks.accumulator();
    acc.add_file("https://www.example.com/page").unwrap();
    acc.add_host("host1.example.com").unwrap();
    assert!(acc.add_tag("").is_err());

    let outcome = acc.flush().await;
    assert!(matches!(outcome, FlushOutcome::Queued(ref r) if r.inserted == 2));
    assert_eq!(p.http.call_count(), 0);

    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));
    let purged = p.hooks.process_queue().await.unwrap();
    assert_eq!(purged.len(), 2);
    assert_eq!(
        p.http.get_calls()[0].json(),
        serde_json::json!({
            "files": ["https://www.example.com/page"],
            "hosts": ["host1.example.com"]
        })
    );
}

#[test_log::test(tokio::test)]
async fn test_accumulator_falls_back_when_queue_unavailable() {
    let p = pipeline();
    p.store.fail_inserts(true);
    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));

    let mut acc = p.hooks.accumulator();
    acc.add_prefix("www.example.com/images/").unwrap();
    let outcome = acc.flush().await;

    assert!(matches!(outcome, FlushOutcome::Purged(_)));
    assert!(p.store.is_empty());
    assert_eq!(
        p.http.get_calls()[0].json(),
        serde_json::json!({ "prefixes": ["www.example.com/images/"] })
    );
}

#[test_log::test(tokio::test)]
async fn test_dropped_accumulator_still_queues() {
    let p = pipeline();
    {
        let mut acc = p.hooks.accumulator();
        acc.add_tag("news").unwrap();
    }

    for _ in 0..100 {
        if !p.store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(p.store.len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_run_backs_off_after_rate_limit() {
    let p = pipeline();
    p.store.insert(PurgeInput::tag("news")).await.unwrap();
    p.http.add_response(
        PURGE_KEY,
        Ok(HttpResponse::new(429, "").with_header("Retry-After", "30")),
    );
    p.http.add_response(PURGE_KEY, Ok(HttpResponse::new(200, OK_BODY)));

    let hooks = p.hooks.with_processor_config(edge_purge::ProcessorConfig {
        interval_ms: 1_000,
        max_retry_after_secs: 3_600,
    });
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(hooks.processor().run(shutdown.clone()));

    // Still inside the Retry-After window: one call, row still queued.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(p.http.call_count(), 1);
    assert_eq!(p.store.len(), 1);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(p.http.call_count(), 2);
    assert!(p.store.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}
