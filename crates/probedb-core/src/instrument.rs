//! Transparent metrics proxy.
//!
//! [`Instrumented`] wraps a backend client and runs each delegated call
//! through [`Instrumented::observe`], which opens a [`CommandRecord`], awaits
//! the real call, finalizes the record and hands it to a [`MetricsSink`].
//! The backend's result is returned untouched; instrumentation failures are
//! logged and dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::classify::{Category, Classifier, Operation};
use crate::config::InstrumentConfig;
use crate::payload::Payload;
use crate::record::CommandRecord;
use crate::registry::{MetricsSink, SharedMetricsRegistry};

/// Error detail recorded for calls dropped before completion.
pub const CANCELLED_DETAIL: &str = "cancelled";

/// A backend wrapped with command metrics.
///
/// Backend capability traits are implemented for `Instrumented<B, C>`
/// whenever `B` implements them, so the proxy is a drop-in replacement.
#[derive(Clone)]
pub struct Instrumented<B, C> {
    inner: B,
    classifier: C,
    sink: Arc<dyn MetricsSink>,
    config: InstrumentConfig,
}

/// Wrap `backend` so its calls are recorded into `registry`.
pub fn instrument<B, C: Classifier>(
    backend: B,
    registry: SharedMetricsRegistry,
    classifier: C,
) -> Instrumented<B, C> {
    Instrumented::new(backend, registry, classifier)
}

impl<B, C: Classifier> Instrumented<B, C> {
    /// Wrap a backend, recording into a registry.
    pub fn new(inner: B, registry: SharedMetricsRegistry, classifier: C) -> Self {
        Self::with_sink(inner, registry, classifier)
    }

    /// Wrap a backend, recording into an arbitrary sink.
    pub fn with_sink(inner: B, sink: Arc<dyn MetricsSink>, classifier: C) -> Self {
        Self {
            inner,
            classifier,
            sink,
            config: InstrumentConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: InstrumentConfig) -> Self {
        self.config = config;
        self
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Unwrap the backend.
    pub fn into_inner(self) -> B {
        self.inner
    }

    /// Current configuration.
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// The operation classifier.
    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Categories an operation is recorded under: `ALL` plus its class.
    pub fn categories(&self, op: &Operation) -> [Category; 2] {
        [Category::ALL, self.classifier.classify(op)]
    }

    /// Run one delegated call with metrics capture.
    ///
    /// `request` and `response` build the snapshots lazily and are only
    /// invoked when capture is enabled; `response` only sees successful
    /// results. The call's `Result` is returned exactly as produced.
    pub async fn observe<T, E, Fut, Req, Resp>(
        &self,
        op: Operation,
        request: Req,
        call: Fut,
        response: Resp,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        Req: FnOnce() -> Payload,
        Resp: FnOnce(&T) -> Payload,
    {
        let mut record = CommandRecord::begin(op.name());
        if self.config.capture_requests {
            let payload = request().limit(self.config.max_payload_bytes);
            self.discard(record.set_request(payload));
        }

        let mut guard = InFlight {
            owner: self,
            pending: Some((op, record)),
        };
        let result = call.await;
        let Some((op, mut record)) = guard.pending.take() else {
            return result;
        };

        match &result {
            Ok(value) => {
                if self.config.capture_responses {
                    let payload = response(value).limit(self.config.max_payload_bytes);
                    self.discard(record.set_response(payload));
                }
                self.discard(record.end_ok());
            }
            Err(e) => self.discard(record.end_err(e.to_string())),
        }
        self.finish(&op, &record);

        result
    }

    fn finish(&self, op: &Operation, record: &CommandRecord) {
        let categories = self.categories(op);
        let cost = record.cost().unwrap_or_default();

        tracing::trace!(
            backend = %self.config.backend,
            command = record.name(),
            category = %categories[1],
            error = record.is_error(),
            cost_us = cost.as_micros() as u64,
            "command recorded"
        );

        if let Some(threshold) = self.config.slow_call_threshold {
            if cost > threshold {
                tracing::warn!(
                    backend = %self.config.backend,
                    command = record.name(),
                    duration_ms = cost.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "command exceeded slow call threshold"
                );
            }
        }

        self.discard(self.sink.record(&categories, record));
    }

    fn discard(&self, result: crate::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(
                backend = %self.config.backend,
                error = %e,
                "dropping command metrics"
            );
        }
    }
}

/// Finalizes the record as cancelled if the proxied future is dropped
/// before the backend call completes.
struct InFlight<'a, B, C: Classifier> {
    owner: &'a Instrumented<B, C>,
    pending: Option<(Operation, CommandRecord)>,
}

impl<B, C: Classifier> Drop for InFlight<'_, B, C> {
    fn drop(&mut self) {
        if let Some((op, mut record)) = self.pending.take() {
            self.owner.discard(record.end_err(CANCELLED_DETAIL));
            self.owner.finish(&op, &record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{KeywordClassifier, TableClassifier};
    use crate::record::Outcome;
    use crate::registry::{new_shared_registry, MetricsRegistry};
    use crate::testing::{CapturingSink, FailingSink};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct NotFound(String);

    impl fmt::Display for NotFound {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "key not found: {}", self.0)
        }
    }

    fn reads() -> TableClassifier {
        TableClassifier::new().with("GET", Category::DQL)
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let registry = new_shared_registry();
        let proxy = instrument((), Arc::clone(&registry), reads());

        let result: Result<u32, NotFound> = proxy
            .observe(
                Operation::named("GET"),
                || Payload::new().arg("key", "a"),
                async { Ok(7) },
                |v| Payload::of(v),
            )
            .await;

        assert_eq!(result, Ok(7));
        let all = registry.get("ALL").unwrap().snapshot();
        assert_eq!((all.call_count, all.error_count), (1, 0));
        assert_eq!(registry.get("DQL").unwrap().call_count(), 1);
    }

    #[tokio::test]
    async fn test_error_passes_through() {
        let registry = new_shared_registry();
        let proxy = instrument((), Arc::clone(&registry), reads());

        let result: Result<u32, NotFound> = proxy
            .observe(
                Operation::named("GET"),
                Payload::new,
                async { Err(NotFound("missing".into())) },
                |v| Payload::of(v),
            )
            .await;

        assert_eq!(result, Err(NotFound("missing".into())));
        for category in ["ALL", "DQL"] {
            let snapshot = registry.get(category).unwrap().snapshot();
            assert_eq!((snapshot.call_count, snapshot.error_count), (1, 1));
        }
    }

    #[tokio::test]
    async fn test_statement_classification() {
        let registry = new_shared_registry();
        let proxy = instrument((), Arc::clone(&registry), KeywordClassifier::new());

        for sql in ["INSERT INTO t VALUES (1)", "SELECT 1", "CREATE TABLE t (a)", "VACUUM"] {
            let _: Result<(), NotFound> = proxy
                .observe(
                    Operation::statement("EXEC", sql),
                    Payload::new,
                    async { Ok(()) },
                    |_| Payload::new(),
                )
                .await;
        }

        assert_eq!(registry.get("ALL").unwrap().call_count(), 4);
        for category in ["DML", "DQL", "DDL", "OTHER"] {
            assert_eq!(registry.get(category).unwrap().call_count(), 1, "{}", category);
        }
    }

    #[tokio::test]
    async fn test_snapshots_captured() {
        let sink = Arc::new(CapturingSink::new());
        let proxy = Instrumented::with_sink((), sink.clone(), reads());

        let _: Result<&str, NotFound> = proxy
            .observe(
                Operation::named("GET"),
                || Payload::new().arg("key", "user:1"),
                async { Ok("alice") },
                |v| Payload::of(v),
            )
            .await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let (categories, record) = &records[0];
        assert_eq!(categories, &vec![Category::ALL, Category::DQL]);
        assert_eq!(record.name(), "GET");
        assert_eq!(record.outcome(), Some(Outcome::Ok));
        assert_eq!(record.request().unwrap().get("key"), Some(&json!("user:1")));
        assert_eq!(record.response().unwrap().get("value"), Some(&json!("alice")));
    }

    #[tokio::test]
    async fn test_capture_disabled_skips_builders() {
        let sink = Arc::new(CapturingSink::new());
        let proxy = Instrumented::with_sink((), sink.clone(), reads())
            .with_config(InstrumentConfig::new("test").without_payloads());

        let _: Result<u8, NotFound> = proxy
            .observe(
                Operation::named("GET"),
                || panic!("request builder must not run"),
                async { Ok(1) },
                |_| panic!("response builder must not run"),
            )
            .await;

        let records = sink.records();
        assert!(records[0].1.request().is_none());
        assert!(records[0].1.response().is_none());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_affect_result() {
        let proxy = Instrumented::with_sink((), Arc::new(FailingSink), reads());

        let ok: Result<u8, NotFound> = proxy
            .observe(Operation::named("GET"), Payload::new, async { Ok(3) }, |_| Payload::new())
            .await;
        let err: Result<u8, NotFound> = proxy
            .observe(
                Operation::named("GET"),
                Payload::new,
                async { Err(NotFound("k".into())) },
                |_| Payload::new(),
            )
            .await;

        assert_eq!(ok, Ok(3));
        assert_eq!(err, Err(NotFound("k".into())));
    }

    #[tokio::test]
    async fn test_closed_registry_does_not_affect_result() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.close();
        let proxy = instrument((), Arc::clone(&registry), reads());

        let result: Result<u8, NotFound> = proxy
            .observe(Operation::named("GET"), Payload::new, async { Ok(9) }, |_| Payload::new())
            .await;

        assert_eq!(result, Ok(9));
        assert!(registry.get("ALL").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_call_recorded_as_error() {
        let sink = Arc::new(CapturingSink::new());
        let proxy = Instrumented::with_sink((), sink.clone(), reads());

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            proxy.observe(
                Operation::named("GET"),
                Payload::new,
                std::future::pending::<Result<u8, NotFound>>(),
                |_| Payload::new(),
            ),
        )
        .await;

        assert!(timed_out.is_err());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0].1;
        assert_eq!(record.outcome(), Some(Outcome::Error));
        assert_eq!(record.error_detail(), Some(CANCELLED_DETAIL));
        assert!(record.cost().unwrap() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_oversized_payload_truncated() {
        let sink = Arc::new(CapturingSink::new());
        let proxy = Instrumented::with_sink((), sink.clone(), reads())
            .with_config(InstrumentConfig::new("test").with_max_payload_bytes(32));

        let big = "x".repeat(256);
        let _: Result<u8, NotFound> = proxy
            .observe(
                Operation::named("SET"),
                || Payload::new().arg("value", &big),
                async { Ok(1) },
                |_| Payload::new(),
            )
            .await;

        let records = sink.records();
        let request = records[0].1.request().unwrap();
        assert_eq!(request.get("truncated"), Some(&json!(true)));
        assert!(request.get("value").is_none());
    }

    /// Collects the level and message of every event.
    #[derive(Clone, Default)]
    struct EventLog(Arc<parking_lot::Mutex<Vec<(tracing::Level, String)>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventLog {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Message(String);

            impl tracing::field::Visit for Message {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
                    if field.name() == "message" {
                        self.0 = format!("{:?}", value);
                    }
                }
            }

            let mut message = Message(String::new());
            event.record(&mut message);
            self.0.lock().push((*event.metadata().level(), message.0));
        }
    }

    #[tokio::test]
    async fn test_slow_call_logged() {
        use tracing_subscriber::layer::SubscriberExt;

        let log = EventLog::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));

        let registry = new_shared_registry();
        let proxy = instrument((), Arc::clone(&registry), reads()).with_config(
            InstrumentConfig::new("redis").with_slow_call_threshold(Duration::from_millis(1)),
        );

        let _: Result<(), NotFound> = proxy
            .observe(
                Operation::named("GET"),
                Payload::new,
                async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                },
                |_| Payload::new(),
            )
            .await;
        let _: Result<(), NotFound> = proxy
            .observe(Operation::named("GET"), Payload::new, async { Ok(()) }, |_| {
                Payload::new()
            })
            .await;

        let events = log.0.lock().clone();
        let count = |level: tracing::Level, message: &str| {
            events
                .iter()
                .filter(|(l, m)| *l == level && m == message)
                .count()
        };
        assert_eq!(count(tracing::Level::TRACE, "command recorded"), 2);
        assert_eq!(
            count(tracing::Level::WARN, "command exceeded slow call threshold"),
            1
        );
        assert_eq!(registry.get("ALL").unwrap().call_count(), 2);
    }
}
