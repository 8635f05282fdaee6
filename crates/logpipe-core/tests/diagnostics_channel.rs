//! Diagnostic channel tests
//!
//! Subscribers receive sink and enricher failures as they happen.

use std::sync::Arc;
use std::time::Duration;

use logpipe_core::{
    values, DiagnosticEvent, EnrichError, Enricher, LogContext, LogEvent, LoggerBuilder,
    MemorySink, EnricherConfig, Value,
};
use tokio::time::timeout;

struct BrokenEnricher;

impl Enricher for BrokenEnricher {
    fn name(&self) -> &str {
        "broken"
    }

    fn enrich(&self, _event: &LogEvent) -> Result<Vec<(String, Value)>, EnrichError> {
        Err(EnrichError::Failed("lookup table missing".to_string()))
    }
}

#[tokio::test]
async fn test_sink_failure_is_published() {
    let sink = MemorySink::new();
    sink.set_failing(true);
    let logger = LoggerBuilder::new()
        .write_to_sink("flaky", None, sink.clone())
        .build()
        .unwrap();
    let mut rx = logger.subscribe_diagnostics();

    logger.error("Payment {Id} failed", values! {"Id" => 17u64});

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("diagnostic in time")
        .unwrap();
    match event {
        DiagnosticEvent::SinkWriteFailed { sink, error } => {
            assert_eq!(sink, "flaky");
            assert!(error.contains("injected"));
        }
        other => panic!("unexpected diagnostic {:?}", other),
    }
    logger.shutdown(Duration::from_secs(5));
}

#[tokio::test]
async fn test_enricher_failure_keeps_event() {
    let sink = MemorySink::new();
    let logger = LoggerBuilder::new()
        .enrich_with(Arc::new(BrokenEnricher))
        .enrich(EnricherConfig::FromLogContext)
        .write_to_sink("mem", None, sink.clone())
        .build()
        .unwrap();
    let mut rx = logger.subscribe_diagnostics();

    {
        let _guard = LogContext::push_property("RequestId", "r-42");
        logger.information("still delivered", vec![]);
    }

    let event = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("diagnostic in time")
        .unwrap();
    assert!(matches!(
        event,
        DiagnosticEvent::EnricherFailed { ref enricher, .. } if enricher == "broken"
    ));

    logger.shutdown(Duration::from_secs(5));
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].property("RequestId"), Some(&Value::from("r-42")));
    assert_eq!(logger.diagnostics().enricher_failures, 1);
}

#[tokio::test]
async fn test_shutdown_loss_is_published() {
    let sink = MemorySink::new().with_delay(Duration::from_millis(50));
    let logger = LoggerBuilder::new()
        .write_to_sink("slow", None, sink)
        .build()
        .unwrap();
    let mut rx = logger.subscribe_diagnostics();

    for _ in 0..50 {
        logger.information("queued", vec![]);
    }
    let report = logger.shutdown(Duration::from_millis(100));
    assert!(!report.completed);

    let mut lost = 0;
    while let Ok(Ok(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        if let DiagnosticEvent::EventsLost { count } = event {
            lost += count;
        }
    }
    assert!(lost > 0);
}
