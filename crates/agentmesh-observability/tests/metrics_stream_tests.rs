//! Streaming reads over the metric store

use agentmesh_observability::metrics::{MetricFilter, MetricSample, MetricStore};
use futures::StreamExt;
use std::sync::Arc;

#[tokio::test]
async fn stream_yields_matching_future_samples() {
    let store = Arc::new(MetricStore::default());
    let stream = store.stream(MetricFilter::named("cpu_usage_percent").for_owner("agent-1"));
    tokio::pin!(stream);

    store.record(MetricSample::new("agent-1", "cpu_usage_percent", 42.0));
    store.record(MetricSample::new("agent-2", "cpu_usage_percent", 99.0));
    store.record(MetricSample::new("agent-1", "memory_usage_percent", 10.0));
    store.record(MetricSample::new("agent-1", "cpu_usage_percent", 43.0));

    let first = stream.next().await.unwrap();
    assert_eq!(first.value, 42.0);
    let second = stream.next().await.unwrap();
    assert_eq!(second.value, 43.0);
}

#[tokio::test]
async fn stream_sees_batch_records() {
    let store = Arc::new(MetricStore::default());
    let stream = store.stream(MetricFilter::named("llm_tokens"));
    tokio::pin!(stream);

    let accepted = store.record_batch(vec![
        MetricSample::new("agent-1", "llm_tokens", 120.0),
        MetricSample::new("agent-1", "llm_tokens", 340.0),
    ]);
    assert_eq!(accepted, 2);

    assert_eq!(stream.next().await.unwrap().value, 120.0);
    assert_eq!(stream.next().await.unwrap().value, 340.0);
}

#[tokio::test]
async fn summarize_over_window() {
    let store = MetricStore::default();
    for v in [10.0, 20.0, 30.0] {
        store.record(MetricSample::new("agent-1", "response_time_seconds", v));
    }
    let summary = store.summarize(&MetricFilter::named("response_time_seconds"));
    assert_eq!(summary.count, 3);
    assert_eq!(summary.min, 10.0);
    assert_eq!(summary.max, 30.0);
    assert_eq!(summary.avg, 20.0);
}
