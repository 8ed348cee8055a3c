//! In-memory event capture.
//!
//! [`RecorderLayer`] keeps every event together with the fields of the spans
//! it was emitted in, so a test can ask "was a warning logged for schedule
//! `daily_full_refresh`?" without parsing log output.
//!
//! ```rust,ignore
//! let recorder = EventRecorder::new();
//! let _guard = tracing::subscriber::set_default(recorder.subscriber());
//! run_something().await;
//! assert!(recorder.contains_message("pipeline run completed"));
//! ```

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry};

/// One captured event.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Event fields, plus fields of enclosing spans the event does not
    /// override.
    pub fields: Map<String, Value>,
}

impl RecordedEvent {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether `key` was recorded with this string value, whatever its
    /// original type.
    pub fn has_field(&self, key: &str, value: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == value,
            None => false,
        }
    }
}

/// Shared sink for captured events. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<RwLock<Vec<RecordedEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self) -> RecorderLayer {
        RecorderLayer { recorder: self.clone() }
    }

    /// A registry with only this recorder attached, for
    /// `tracing::subscriber::set_default`.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        Registry::default().with(self.layer())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.read() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_at(&self, level: Level) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.level == level).collect()
    }

    /// Events carrying `key` with the given value, directly or from a span.
    pub fn find(&self, key: &str, value: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.has_field(key, value)).collect()
    }

    pub fn contains_message(&self, message: &str) -> bool {
        self.events().iter().any(|e| e.message == message)
    }

    pub fn clear(&self) {
        match self.events.write() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn push(&self, event: RecordedEvent) {
        match self.events.write() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Layer feeding an [`EventRecorder`].
pub struct RecorderLayer {
    recorder: EventRecorder,
}

#[derive(Clone, Default)]
struct SpanFields(Map<String, Value>);

impl<S> Layer<S> for RecorderLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            fields.0.extend(visitor.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let message = match visitor.fields.remove("message") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        // innermost span first; nearer fields win
        let mut fields = visitor.fields;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &span_fields.0 {
                        fields.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        let metadata = event.metadata();
        self.recorder.push(RecordedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message,
            fields,
        });
    }
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }
}
