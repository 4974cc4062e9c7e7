//! In-process metric store
//!
//! One ring of samples per (owner, metric name, label set). Rings are
//! capped in length and age; the oldest samples are evicted first. A
//! secondary latest-by-(owner, name) index serves current-value reads
//! without walking rings. Reads observe every write that completed
//! before the read started; nothing is promised across processes.

use chrono::{DateTime, Duration, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::broadcast;

const DEFAULT_QUERY_LIMIT: usize = 1000;
const STREAM_BUFFER: usize = 1024;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// Agent id, or [`agentmesh_core::SYSTEM_OWNER`] for mesh-level series.
    pub owner: String,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            unit: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct MetricFilter {
    pub owner: Option<String>,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl MetricFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn for_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, sample: &MetricSample) -> bool {
        if let Some(owner) = &self.owner {
            if &sample.owner != owner {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &sample.name != name {
                return false;
            }
        }
        for (key, value) in &self.labels {
            if sample.labels.get(key) != Some(value) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if sample.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if sample.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Clone, Hash, PartialEq, Eq)]
struct SeriesKey {
    owner: String,
    name: String,
    labels: String,
}

impl SeriesKey {
    fn of(sample: &MetricSample) -> Self {
        // BTreeMap iteration is sorted, so the label encoding is canonical.
        let labels = sample
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        Self {
            owner: sample.owner.clone(),
            name: sample.name.clone(),
            labels,
        }
    }
}

pub struct MetricStore {
    series: dashmap::DashMap<SeriesKey, VecDeque<MetricSample>>,
    latest: dashmap::DashMap<(String, String), MetricSample>,
    live: broadcast::Sender<MetricSample>,
    max_samples: usize,
    max_age: Duration,
}

impl MetricStore {
    pub fn new(max_samples: usize, max_age: Duration) -> Self {
        let (live, _) = broadcast::channel(STREAM_BUFFER);
        Self {
            series: dashmap::DashMap::new(),
            latest: dashmap::DashMap::new(),
            live,
            max_samples,
            max_age,
        }
    }

    /// Record one sample. O(1) plus eviction at the ring head.
    pub fn record(&self, sample: MetricSample) {
        let horizon = sample.timestamp - self.max_age;
        let key = SeriesKey::of(&sample);

        {
            let mut ring = self.series.entry(key).or_default();
            ring.push_back(sample.clone());
            while ring.len() > self.max_samples {
                ring.pop_front();
            }
            while ring.front().is_some_and(|s| s.timestamp < horizon) {
                ring.pop_front();
            }
        }

        self.latest
            .insert((sample.owner.clone(), sample.name.clone()), sample.clone());
        let _ = self.live.send(sample);
    }

    /// Record a batch, returning how many samples were accepted.
    pub fn record_batch(&self, samples: Vec<MetricSample>) -> usize {
        let count = samples.len();
        for sample in samples {
            self.record(sample);
        }
        count
    }

    /// Most recent sample for (owner, name), across all label sets.
    pub fn latest(&self, owner: &str, name: &str) -> Option<MetricSample> {
        self.latest
            .get(&(owner.to_string(), name.to_string()))
            .map(|entry| entry.clone())
    }

    /// Owners that have reported `name` at least once.
    pub fn owners_of(&self, name: &str) -> Vec<String> {
        let mut owners: Vec<String> = self
            .latest
            .iter()
            .filter(|entry| entry.key().1 == name)
            .map(|entry| entry.key().0.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    /// Samples matching the filter, time-ascending, bounded by the
    /// filter's limit. An empty window yields an empty vec, never an error.
    pub fn query(&self, filter: &MetricFilter) -> Vec<MetricSample> {
        let mut out: Vec<MetricSample> = self
            .series
            .iter()
            .filter(|entry| {
                let key = entry.key();
                filter.owner.as_ref().is_none_or(|o| &key.owner == o)
                    && filter.name.as_ref().is_none_or(|n| &key.name == n)
            })
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|s| filter.matches(s))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|s| s.timestamp);
        out.truncate(filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT));
        out
    }

    /// Count/min/max/avg over the matching samples.
    pub fn summarize(&self, filter: &MetricFilter) -> MetricSummary {
        let samples = self.query(filter);
        if samples.is_empty() {
            return MetricSummary {
                count: 0,
                min: 0.0,
                max: 0.0,
                avg: 0.0,
            };
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in &samples {
            min = min.min(sample.value);
            max = max.max(sample.value);
            sum += sample.value;
        }
        MetricSummary {
            count: samples.len(),
            min,
            max,
            avg: sum / samples.len() as f64,
        }
    }

    /// Lazy sequence of future samples matching the filter. Finite only
    /// when the consumer drops it; samples missed under lag are skipped.
    pub fn stream(&self, filter: MetricFilter) -> impl Stream<Item = MetricSample> {
        let mut rx = self.live.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(sample) => {
                        if filter.matches(&sample) {
                            yield sample;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(1000, Duration::hours(1))
    }
}
