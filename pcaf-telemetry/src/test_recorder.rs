use tracing::{Level, info, info_span, warn};

use crate::recorder::EventRecorder;

#[test]
fn captures_message_level_and_fields() {
    let recorder = EventRecorder::new();
    tracing::subscriber::with_default(recorder.subscriber(), || {
        info!(collection = "loan_documents", added = 3u64, ratio = 0.5, "stored collection");
    });

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.level, Level::INFO);
    assert_eq!(event.message, "stored collection");
    assert_eq!(event.field("added"), Some(&serde_json::json!(3)));
    assert_eq!(event.field("ratio"), Some(&serde_json::json!(0.5)));
    assert!(event.has_field("collection", "loan_documents"));
    assert!(event.target.ends_with("test_recorder"));
}

#[test]
fn events_inherit_span_fields() {
    let recorder = EventRecorder::new();
    tracing::subscriber::with_default(recorder.subscriber(), || {
        let outer = info_span!("scheduled_run", schedule = "daily_full_refresh");
        let _outer = outer.enter();
        let inner = info_span!("pipeline_run", run_id = "r-1", schedule = "overridden");
        let _inner = inner.enter();
        warn!("pipeline already running, skipping scheduled run");
    });

    let found = recorder.find("run_id", "r-1");
    assert_eq!(found.len(), 1);
    // the innermost span wins on conflicting keys
    assert!(found[0].has_field("schedule", "overridden"));
    assert_eq!(recorder.events_at(Level::WARN).len(), 1);
}

#[test]
fn late_recorded_span_fields_are_visible() {
    let recorder = EventRecorder::new();
    tracing::subscriber::with_default(recorder.subscriber(), || {
        let span = info_span!("upload", upload_id = tracing::field::Empty);
        span.record("upload_id", "u-42");
        let _entered = span.enter();
        info!("upload processed");
    });
    assert_eq!(recorder.find("upload_id", "u-42").len(), 1);
}

#[tokio::test]
async fn clones_share_one_buffer() {
    let recorder = EventRecorder::new();
    let handle = recorder.clone();
    {
        let _guard = tracing::subscriber::set_default(recorder.subscriber());
        info!(flag = true, "first");
        tokio::task::yield_now().await;
        info!("second");
    }
    assert!(handle.contains_message("first"));
    assert!(handle.find("flag", "true").len() == 1);
    handle.clear();
    assert!(recorder.events().is_empty());
}
