// parquedb-stream - Tail event processing for stream views
//
// A registry of materialized-view definitions consumes the write engine's
// event tail. Each view filters and transforms events into records that
// accumulate in a per-view pending batch, flushed to a sink when count or
// byte thresholds are reached. Views are isolated: one view failing on an
// event never stops the others.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Fallible per-event predicate; an error counts as a skip.
pub type FilterFn = dyn Fn(&Value) -> Result<bool, String> + Send + Sync;
/// Fallible transform; may fan one event out into several records.
pub type TransformFn = dyn Fn(&Value) -> Result<Vec<Value>, String> + Send + Sync;
/// Invoked with (view name, error detail) when a view errors on an event.
pub type ErrorHandler = dyn Fn(&str, &str) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Flush as thresholds are crossed.
    Eager,
    /// Only flush on explicit `flush()`.
    Manual,
}

/// A materialized-view definition.
pub struct StreamView {
    pub name: String,
    /// Source stream this view consumes.
    pub stream: String,
    /// Output schema document, carried through to the sink.
    pub schema: Value,
    pub filter: Option<Box<FilterFn>>,
    pub transform: Box<TransformFn>,
    pub refresh: RefreshMode,
}

impl StreamView {
    /// Identity view over a stream: every event becomes one record.
    pub fn passthrough(name: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: stream.into(),
            schema: Value::Null,
            filter: None,
            transform: Box::new(|event| Ok(vec![event.clone()])),
            refresh: RefreshMode::Eager,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_filter(
        mut self,
        filter: impl Fn(&Value) -> Result<bool, String> + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_transform(
        mut self,
        transform: impl Fn(&Value) -> Result<Vec<Value>, String> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Where completed view batches go. Borrowed records let a failed emit be
/// requeued without copying the batch up front.
#[async_trait]
pub trait ViewSink: Send + Sync {
    async fn emit(&self, view: &str, records: &[Value]) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchThresholds {
    pub max_records: usize,
    pub max_bytes: usize,
}

impl Default for BatchThresholds {
    fn default() -> Self {
        Self {
            max_records: 100,
            max_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewCounters {
    pub processed: usize,
    pub filtered: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub processed: usize,
    pub filtered: usize,
    pub errors: usize,
    pub by_view: HashMap<String, ViewCounters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub views: usize,
    pub records: usize,
    pub errors: usize,
}

struct ViewState {
    view: StreamView,
    pending: Vec<Value>,
    pending_bytes: usize,
}

pub struct TailProcessor {
    views: Mutex<Vec<ViewState>>,
    thresholds: BatchThresholds,
    sink: Arc<dyn ViewSink>,
    on_error: Option<Box<ErrorHandler>>,
}

impl TailProcessor {
    pub fn new(sink: Arc<dyn ViewSink>, thresholds: BatchThresholds) -> Self {
        Self {
            views: Mutex::new(Vec::new()),
            thresholds,
            sink,
            on_error: None,
        }
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// False when a view with this name is already registered.
    pub fn register(&self, view: StreamView) -> bool {
        let mut views = self.views.lock();
        if views.iter().any(|v| v.view.name == view.name) {
            return false;
        }
        tracing::debug!("registered stream view '{}' on '{}'", view.name, view.stream);
        views.push(ViewState {
            view,
            pending: Vec::new(),
            pending_bytes: 0,
        });
        true
    }

    /// Drops the view and any pending records.
    pub fn unregister(&self, name: &str) -> bool {
        let mut views = self.views.lock();
        let before = views.len();
        views.retain(|v| v.view.name != name);
        views.len() != before
    }

    pub fn view_names(&self) -> Vec<String> {
        self.views.lock().iter().map(|v| v.view.name.clone()).collect()
    }

    /// Run a batch of events through every registered view.
    pub async fn process_events(&self, events: &[Value]) -> ProcessResult {
        let mut result = ProcessResult::default();

        {
            let mut views = self.views.lock();
            for event in events {
                for state in views.iter_mut() {
                    let counters = result.by_view.entry(state.view.name.clone()).or_default();

                    let keep = match &state.view.filter {
                        Some(filter) => match filter(event) {
                            Ok(keep) => keep,
                            Err(detail) => {
                                counters.errors += 1;
                                result.errors += 1;
                                self.report_error(&state.view.name, &detail);
                                continue;
                            }
                        },
                        None => true,
                    };
                    if !keep {
                        counters.filtered += 1;
                        result.filtered += 1;
                        continue;
                    }

                    match (state.view.transform)(event) {
                        Ok(records) => {
                            for record in records {
                                state.pending_bytes += record.to_string().len();
                                state.pending.push(record);
                            }
                            counters.processed += 1;
                            result.processed += 1;
                        }
                        Err(detail) => {
                            counters.errors += 1;
                            result.errors += 1;
                            self.report_error(&state.view.name, &detail);
                        }
                    }
                }
            }
        }

        let flush = self.flush_ready(false).await;
        result.errors += flush.errors;
        result
    }

    /// Drain every view's pending batch regardless of thresholds.
    pub async fn flush(&self) -> FlushResult {
        self.flush_ready(true).await
    }

    /// Flush views whose pending batch crossed a threshold (or all of them
    /// when forced). Batches are drained outside the registry lock; a failed
    /// emit puts its records back for the next attempt.
    async fn flush_ready(&self, force: bool) -> FlushResult {
        let ready: Vec<(String, Vec<Value>)> = {
            let mut views = self.views.lock();
            views
                .iter_mut()
                .filter(|state| {
                    !state.pending.is_empty()
                        && (force
                            || (state.view.refresh == RefreshMode::Eager
                                && (state.pending.len() >= self.thresholds.max_records
                                    || state.pending_bytes >= self.thresholds.max_bytes)))
                })
                .map(|state| {
                    state.pending_bytes = 0;
                    (state.view.name.clone(), std::mem::take(&mut state.pending))
                })
                .collect()
        };

        let mut result = FlushResult::default();
        for (name, records) in ready {
            let count = records.len();
            match self.sink.emit(&name, &records).await {
                Ok(()) => {
                    result.views += 1;
                    result.records += count;
                }
                Err(detail) => {
                    result.errors += 1;
                    self.report_error(&name, &detail);
                    // Requeue in original order so a transient sink failure
                    // loses nothing
                    let mut views = self.views.lock();
                    if let Some(state) = views.iter_mut().find(|v| v.view.name == name) {
                        let requeued_bytes: usize =
                            records.iter().map(|r| r.to_string().len()).sum();
                        let newer = std::mem::take(&mut state.pending);
                        state.pending = records;
                        state.pending.extend(newer);
                        state.pending_bytes += requeued_bytes;
                    }
                }
            }
        }
        result
    }

    fn report_error(&self, view: &str, detail: &str) {
        tracing::warn!("stream view '{}' error: {}", view, detail);
        if let Some(handler) = &self.on_error {
            handler(view, detail);
        }
    }
}
