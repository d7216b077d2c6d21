// tests/ingest_pipeline.rs
mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{bounded, cities, publisher, Behavior, ScriptedSource};
use serde_json::json;
use tokio::sync::mpsc;
use weather_ingest::publish::memory::MemoryBroker;
use weather_ingest::publish::PublishCause;
use weather_ingest::source::FetchCause;
use weather_ingest::{shutdown_channel, DeliveryOutcome, IngestLoop, LoopCfg, Reading};

#[tokio::test]
async fn timeout_for_one_city_does_not_block_the_other() {
    let payload = json!({"temp": 20, "humidity": 60});
    let source = Arc::new(ScriptedSource::new(vec![
        ("Paris", Behavior::Payload(payload.clone())),
        ("London", Behavior::Timeout),
    ]));
    let broker = Arc::new(MemoryBroker::new());
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let (_stop, rx) = shutdown_channel();

    let summary = IngestLoop::new(
        cities(&["Paris", "London"]),
        source,
        publisher(&broker, Duration::from_secs(1)),
        bounded(1),
    )
    .with_reports(report_tx)
    .run(rx)
    .await;

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.fetch_failed, 1);

    let log = broker.messages("weather");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].key, "Paris");
    let decoded = Reading::from_wire(&log[0].value).unwrap();
    assert_eq!(
        serde_json::Value::Object(decoded.payload().clone()),
        payload
    );

    let report = report_rx.recv().await.unwrap();
    assert!(!report.interrupted);
    match report.outcome_for("London") {
        Some(DeliveryOutcome::FetchFailed(e)) => {
            assert_eq!(e.city, "London");
            assert!(matches!(e.cause, FetchCause::Timeout));
        }
        other => panic!("expected fetch failure for London, got {other:?}"),
    }
}

#[tokio::test]
async fn publish_timeout_keeps_earlier_commit_and_retries_next_cycle() {
    let source = Arc::new(ScriptedSource::new(vec![]));
    let broker = Arc::new(MemoryBroker::new());
    // Second send of the first cycle never acks in time.
    broker.stall_nth(1, Duration::from_secs(5));
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let (_stop, rx) = shutdown_channel();

    let summary = IngestLoop::new(
        cities(&["Paris", "London"]),
        source.clone(),
        publisher(&broker, Duration::from_millis(50)),
        bounded(2),
    )
    .with_reports(report_tx)
    .run(rx)
    .await;

    let first = report_rx.recv().await.unwrap();
    assert!(first.outcome_for("Paris").unwrap().is_delivered());
    match first.outcome_for("London") {
        Some(DeliveryOutcome::PublishFailed(e)) => {
            assert_eq!(e.city, "London");
            assert!(matches!(e.cause, PublishCause::Timeout(50)));
        }
        other => panic!("expected publish failure for London, got {other:?}"),
    }

    let second = report_rx.recv().await.unwrap();
    assert_eq!(second.delivered(), 2);

    assert_eq!(summary.publish_failed, 1);
    // London is fetched once per cycle: no immediate retry.
    assert_eq!(
        source.calls(),
        vec!["Paris", "London", "Paris", "London"]
    );

    let keys: Vec<_> = broker
        .messages("weather")
        .into_iter()
        .map(|r| (r.offset, r.key))
        .collect();
    assert_eq!(
        keys,
        vec![
            (0, "Paris".to_string()),
            (1, "Paris".to_string()),
            (2, "London".to_string()),
        ]
    );
}

#[tokio::test]
async fn per_city_order_matches_fetch_order_under_concurrency() {
    let source = Arc::new(ScriptedSource::new(vec![]));
    let broker = Arc::new(MemoryBroker::new());
    let (_stop, rx) = shutdown_channel();

    let cfg = LoopCfg {
        concurrent: true,
        ..bounded(4)
    };
    IngestLoop::new(
        cities(&["Paris", "London", "Tokyo"]),
        source,
        publisher(&broker, Duration::from_secs(1)),
        cfg,
    )
    .run(rx)
    .await;

    let log = broker.messages("weather");
    assert_eq!(log.len(), 12);
    for city in ["Paris", "London", "Tokyo"] {
        let readings: Vec<Reading> = log
            .iter()
            .filter(|r| r.key == city)
            .map(|r| Reading::from_wire(&r.value).unwrap())
            .collect();
        assert_eq!(readings.len(), 4);
        let seqs: Vec<u64> = readings
            .iter()
            .map(|r| r.payload()["seq"].as_u64().unwrap())
            .collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted, "{city} published out of fetch order");
        assert!(readings
            .windows(2)
            .all(|w| w[0].observed_at() <= w[1].observed_at()));
    }
}

#[tokio::test]
async fn rerun_with_same_city_list_uses_same_topic_and_keys() {
    let broker = Arc::new(MemoryBroker::new());
    for _ in 0..2 {
        let (_stop, rx) = shutdown_channel();
        IngestLoop::new(
            cities(&["Paris", "London"]),
            Arc::new(ScriptedSource::new(vec![])),
            publisher(&broker, Duration::from_secs(1)),
            bounded(1),
        )
        .run(rx)
        .await;
    }

    assert_eq!(broker.topics(), vec!["weather".to_string()]);
    let keys: BTreeSet<String> = broker
        .messages("weather")
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(
        keys,
        BTreeSet::from(["London".to_string(), "Paris".to_string()])
    );
}

#[tokio::test]
async fn panicking_city_is_isolated() {
    let source = Arc::new(ScriptedSource::new(vec![("Tokyo", Behavior::Panic)]));
    let broker = Arc::new(MemoryBroker::new());
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let (_stop, rx) = shutdown_channel();

    let summary = IngestLoop::new(
        cities(&["Paris", "Tokyo", "Sydney"]),
        source,
        publisher(&broker, Duration::from_secs(1)),
        bounded(2),
    )
    .with_reports(report_tx)
    .run(rx)
    .await;

    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.delivered, 4);
    assert_eq!(summary.lost, 2);
    let first = report_rx.recv().await.unwrap();
    match first.outcome_for("Tokyo") {
        Some(DeliveryOutcome::Panicked(msg)) => assert!(msg.contains("Tokyo"), "{msg}"),
        other => panic!("expected Tokyo to be reported as panicked, got {other:?}"),
    }
    assert_eq!(first.panicked(), 1);
    assert!(first.abandoned.is_empty());
    assert!(first.outcome_for("Sydney").unwrap().is_delivered());
}
