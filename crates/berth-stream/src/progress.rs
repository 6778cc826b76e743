//! Progress de-duplication for pull, push and build streams.
//!
//! Engines report layer progress many times per second, most of it repeating
//! the previous update for the same layer. [`ProgressTracker`] remembers the
//! last `(status, progressDetail)` pair reported for each layer id and forwards
//! an event only when that pair changes. Events that do not belong to a layer
//! (build output, global status lines, auxiliary results, errors) are always
//! forwarded.

use std::collections::HashMap;
use std::mem;

use serde_json::Value;
use strum::Display;
use tracing::{debug, error, info};

const PROGRESS_TARGET: &str = "berth::stream::progress";

/// Classification of a forwarded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProgressKind {
    /// Per-layer status update.
    Layer,
    /// Status line not tied to a layer.
    Status,
    /// Build output text.
    Stream,
    /// Auxiliary result such as a built image id or pushed digest.
    Aux,
    /// Error reported by the engine.
    Error,
    /// Any other event shape.
    Other,
}

/// Last state reported for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerState {
    /// Layer identifier from the event's `id` field.
    pub layer_id: String,
    /// Last forwarded status text.
    pub last_status: String,
    /// Last forwarded `progressDetail` object, if any.
    pub last_progress_detail: Option<Value>,
}

/// Forwarded event together with its classification and rendered line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    /// The event exactly as decoded.
    pub event: Value,
    /// What kind of event this is.
    pub kind: ProgressKind,
    /// Single log line describing the event.
    pub line: String,
}

/// Receives every record the tracker forwards.
pub trait ProgressObserver {
    /// Handles one forwarded record.
    fn record(&mut self, record: &ProgressRecord);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressRecord),
{
    fn record(&mut self, record: &ProgressRecord) {
        self(record);
    }
}

/// Observer that writes each record as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn record(&mut self, record: &ProgressRecord) {
        match record.kind {
            ProgressKind::Error => {
                error!(target: PROGRESS_TARGET, kind = %record.kind, "{}", record.line);
            }
            _ => info!(target: PROGRESS_TARGET, kind = %record.kind, "{}", record.line),
        }
    }
}

/// Aggregate outcome of a progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSummary {
    /// Records handed to the observer.
    pub forwarded: usize,
    /// Layer updates dropped as repeats.
    pub suppressed: usize,
    /// First error message reported by the engine.
    pub error: Option<String>,
}

impl ProgressSummary {
    /// Returns `true` when the engine reported an error.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Reduces a progress event sequence into de-duplicated records.
pub struct ProgressTracker<O> {
    observer: O,
    layers: HashMap<String, LayerState>,
    summary: ProgressSummary,
}

impl<O: ProgressObserver> ProgressTracker<O> {
    /// Creates a tracker delivering records to `observer`.
    pub fn new(observer: O) -> Self {
        Self {
            observer,
            layers: HashMap::new(),
            summary: ProgressSummary::default(),
        }
    }

    /// Processes one event, returning the record when it is forwarded.
    pub fn observe(&mut self, event: &Value) -> Option<ProgressRecord> {
        let record = self.classify(event)?;
        self.summary.forwarded += 1;
        self.observer.record(&record);
        Some(record)
    }

    /// Returns the stored state for `layer_id`.
    #[must_use]
    pub fn layer(&self, layer_id: &str) -> Option<&LayerState> {
        self.layers.get(layer_id)
    }

    /// Number of layers currently tracked.
    #[must_use]
    pub fn tracked_layers(&self) -> usize {
        self.layers.len()
    }

    /// Drops all layer state, keeping the summary.
    pub fn abandon(&mut self) {
        self.layers.clear();
    }

    /// Ends the stream, returning the summary and resetting the tracker.
    pub fn finish(&mut self) -> ProgressSummary {
        self.layers.clear();
        mem::take(&mut self.summary)
    }

    /// Wraps a fallible event sequence so only forwarded records are yielded.
    pub fn track<I, E>(self, events: I) -> Tracked<I, O>
    where
        I: Iterator<Item = Result<Value, E>>,
    {
        Tracked {
            events,
            tracker: self,
            done: false,
        }
    }

    fn classify(&mut self, event: &Value) -> Option<ProgressRecord> {
        if let Some(message) = error_message(event) {
            if self.summary.error.is_none() {
                self.summary.error = Some(message.clone());
            }
            return Some(record(event, ProgressKind::Error, format!("error: {message}")));
        }

        let status = event.get("status").and_then(Value::as_str);
        let layer_id = event.get("id").and_then(Value::as_str);
        if let (Some(layer_id), Some(status)) = (layer_id, status) {
            return self.layer_update(event, layer_id, status);
        }

        if let Some(text) = event.get("stream").and_then(Value::as_str) {
            return Some(record(
                event,
                ProgressKind::Stream,
                text.trim_end().to_owned(),
            ));
        }
        if let Some(status) = status {
            return Some(record(event, ProgressKind::Status, status.to_owned()));
        }
        if let Some(aux) = event.get("aux") {
            return Some(record(event, ProgressKind::Aux, render_aux(aux)));
        }
        Some(record(event, ProgressKind::Other, event.to_string()))
    }

    fn layer_update(
        &mut self,
        event: &Value,
        layer_id: &str,
        status: &str,
    ) -> Option<ProgressRecord> {
        let detail = event.get("progressDetail").cloned();
        if let Some(state) = self.layers.get_mut(layer_id) {
            if state.last_status == status && state.last_progress_detail == detail {
                self.summary.suppressed += 1;
                debug!(target: PROGRESS_TARGET, layer = layer_id, status, "repeated layer update suppressed");
                return None;
            }
            status.clone_into(&mut state.last_status);
            state.last_progress_detail = detail;
        } else {
            self.layers.insert(
                layer_id.to_owned(),
                LayerState {
                    layer_id: layer_id.to_owned(),
                    last_status: status.to_owned(),
                    last_progress_detail: detail,
                },
            );
        }

        let line = match event.get("progress").and_then(Value::as_str) {
            Some(progress) if !progress.is_empty() => format!("{layer_id}: {status} {progress}"),
            _ => format!("{layer_id}: {status}"),
        };
        Some(record(event, ProgressKind::Layer, line))
    }
}

fn record(event: &Value, kind: ProgressKind, line: String) -> ProgressRecord {
    ProgressRecord {
        event: event.clone(),
        kind,
        line,
    }
}

fn error_message(event: &Value) -> Option<String> {
    let detail = event
        .get("errorDetail")
        .and_then(|detail| detail.get("message"))
        .and_then(Value::as_str);
    match event.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(Value::Null) | None => detail.map(str::to_owned),
        Some(other) => Some(detail.map_or_else(|| other.to_string(), str::to_owned)),
    }
}

fn render_aux(aux: &Value) -> String {
    if let Some(id) = aux.get("ID").and_then(Value::as_str) {
        return format!("built {id}");
    }
    if let Some(digest) = aux.get("Digest").and_then(Value::as_str) {
        let tag = aux.get("Tag").and_then(Value::as_str).unwrap_or("latest");
        return format!("{tag}: digest {digest}");
    }
    format!("aux: {aux}")
}

/// Iterator adaptor returned by [`ProgressTracker::track`].
///
/// Suppressed updates are skipped. The first upstream error is yielded once,
/// clears the layer map and ends the sequence.
pub struct Tracked<I, O> {
    events: I,
    tracker: ProgressTracker<O>,
    done: bool,
}

impl<I, O: ProgressObserver> Tracked<I, O> {
    /// Ends tracking and returns the aggregate outcome.
    pub fn into_summary(mut self) -> ProgressSummary {
        self.tracker.finish()
    }

    /// Returns the tracker driving this adaptor.
    pub const fn tracker(&self) -> &ProgressTracker<O> {
        &self.tracker
    }
}

impl<I, E, O> Iterator for Tracked<I, O>
where
    I: Iterator<Item = Result<Value, E>>,
    O: ProgressObserver,
{
    type Item = Result<ProgressRecord, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.events.next() {
                Some(Ok(event)) => {
                    if let Some(forwarded) = self.tracker.observe(&event) {
                        return Some(Ok(forwarded));
                    }
                }
                Some(Err(error)) => {
                    self.done = true;
                    self.tracker.abandon();
                    return Some(Err(error));
                }
                None => {
                    self.done = true;
                    self.tracker.abandon();
                    return None;
                }
            }
        }
    }
}
