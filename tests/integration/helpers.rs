//! Test helpers and utilities

use std::fmt;
use std::sync::{Arc, Mutex};

use db_tracer::{DbTracer, DbTracerBuilder, LogPolicy, LogRecord, LogSink};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;

/// Log sink that keeps every record in memory.
#[derive(Default)]
pub struct CaptureSink {
    records: Mutex<Vec<LogRecord>>,
}

impl LogSink for CaptureSink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Tracer wired to in-memory backends.
pub struct Harness {
    pub tracer: Arc<DbTracer>,
    pub provider: TracerProvider,
    exporter: InMemorySpanExporter,
    logs: Arc<CaptureSink>,
}

#[allow(dead_code)]
impl Harness {
    /// Create a harness with the given success-path policy
    pub fn new(policy: LogPolicy) -> Self {
        Self::with(|builder| builder.log_policy(policy))
    }

    /// Create a harness with extra builder settings
    pub fn with(configure: impl FnOnce(DbTracerBuilder) -> DbTracerBuilder) -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let logs = Arc::new(CaptureSink::default());

        let builder = DbTracer::builder()
            .tracer(provider.tracer("db_tracer_test"))
            .log_sink(logs.clone());
        let tracer = configure(builder).build().expect("Failed to build tracer");

        Self {
            tracer: Arc::new(tracer),
            provider,
            exporter,
            logs,
        }
    }

    /// Finished spans, in end order
    pub fn spans(&self) -> Vec<SpanData> {
        self.exporter
            .get_finished_spans()
            .expect("Failed to read spans")
    }

    /// The single finished span
    pub fn only_span(&self) -> SpanData {
        let mut spans = self.spans();
        assert_eq!(spans.len(), 1, "expected exactly one span");
        spans.remove(0)
    }

    /// Emitted log records, in emission order
    pub fn records(&self) -> Vec<LogRecord> {
        self.logs.records.lock().unwrap().clone()
    }

    /// Number of duration observations for (operation, query_name, query_type, status)
    pub fn duration_count(&self, labels: [&str; 4]) -> u64 {
        self.tracer
            .metrics()
            .operation_duration_seconds
            .with_label_values(&labels)
            .get_sample_count()
    }

    /// Sum of observed durations in seconds for the label set
    pub fn duration_sum(&self, labels: [&str; 4]) -> f64 {
        self.tracer
            .metrics()
            .operation_duration_seconds
            .with_label_values(&labels)
            .get_sample_sum()
    }
}

/// Get a span attribute rendered as a string
pub fn attr(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

/// Error standing in for a driver error
#[derive(Debug)]
pub struct DriverError(pub &'static str);

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for DriverError {}
