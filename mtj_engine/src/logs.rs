//! The bounded log ring buffer behind `subscribeToLogs` (§6, SPEC_FULL
//! §9.2): a `tracing::Layer` that pushes formatted records into a shared
//! ring buffer, rather than a second ad-hoc logging path alongside
//! `tracing`'s own.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub const LOG_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

/// Cloneable handle onto the shared ring buffer; the engine holds one to
/// read snapshots, `LogLayer` holds one to push into it.
#[derive(Clone)]
pub struct LogBuffer(Arc<Mutex<VecDeque<LogRecord>>>);

impl LogBuffer {
    pub fn new() -> Self {
        LogBuffer(Arc::new(Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY))))
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.iter().cloned().collect()
    }

    fn push(&self, record: LogRecord) {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if buf.len() >= LOG_RING_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(record);
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        LogBuffer::new()
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    is_success: bool,
}

impl Visit for EventVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.is_success = value;
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// A `Layer` that classifies each `INFO`-and-above event into one of the
/// four levels `subscribeToLogs` exposes and pushes it into the shared
/// buffer. Events carrying a `success = true` field (emitted by the
/// scheduler on a completed segment) are reported as `SUCCESS` rather than
/// `INFO`; everything else maps from the `tracing::Level` directly.
pub struct LogLayer {
    buffer: LogBuffer,
}

impl LogLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        LogLayer { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::TRACE || level == Level::DEBUG {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let reported_level = if visitor.is_success {
            LogLevel::Success
        } else {
            match level {
                Level::ERROR => LogLevel::Error,
                Level::WARN => LogLevel::Warning,
                _ => LogLevel::Info,
            }
        };

        self.buffer.push(LogRecord {
            level: reported_level,
            target: event.metadata().target().to_owned(),
            message: visitor.message,
        });
    }
}
