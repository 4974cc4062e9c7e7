//! Agentmesh Observability - metric store, trace recorder, alerting, notification sinks

pub mod alert;
pub mod metrics;
pub mod notify;
pub mod trace;

pub use alert::{Alert, AlertEngine, AlertRule};
pub use metrics::{MetricFilter, MetricSample, MetricStore, MetricSummary};
pub use notify::{ChatSink, MailTransport, Notifier, NotifySink, SinkConfig, WebhookSink};
pub use trace::{TraceRecord, TraceRecorder};
