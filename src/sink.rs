// sink.rs: Where session events go. The UI layer (or the CLI) implements
// `EventSink`; the controller calls it with the session lock held, so an
// implementation must not call back into the controller synchronously.

use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;

use crate::render::summary_text;
use crate::session::{ErrorPayload, ResultPayload};

pub trait EventSink: Send + Sync {
    /// A capture cycle produced a (possibly empty) filtered, sorted result set.
    /// It replaces whatever was drawn before.
    fn on_result(&self, payload: &ResultPayload);

    /// A capture cycle failed. The loop keeps running.
    fn on_error(&self, payload: &ErrorPayload);

    /// The session stopped; remove the overlay.
    fn on_clear(&self) {}
}

/// Writes results and errors to the log.
#[derive(Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_result(&self, payload: &ResultPayload) {
        if payload.detections.is_empty() {
            log::info!("[cycle {}] no detections above threshold", payload.cycle);
        } else {
            log::info!(
                "[cycle {}] {} detection(s):\n{}",
                payload.cycle,
                payload.detections.len(),
                summary_text(&payload.detections)
            );
        }
    }

    fn on_error(&self, payload: &ErrorPayload) {
        log::error!("[cycle {}] {}", payload.cycle, payload.message);
    }

    fn on_clear(&self) {
        log::info!("Overlay cleared");
    }
}

/// Owned copy of a sink callback.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum SinkEvent {
    Result(ResultPayload),
    Error(ErrorPayload),
    Clear,
}

/// Forwards every callback to an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_result(&self, payload: &ResultPayload) {
        let _ = self.tx.send(SinkEvent::Result(payload.clone()));
    }

    fn on_error(&self, payload: &ErrorPayload) {
        let _ = self.tx.send(SinkEvent::Error(payload.clone()));
    }

    fn on_clear(&self) {
        let _ = self.tx.send(SinkEvent::Clear);
    }
}

/// Env var naming a JSONL file that receives a copy of every emitted event.
pub const EVENT_LOG_ENV: &str = "LOOKOUT_EVENT_LOG";

/// Append `{"event", "timestamp", "payload"}` to the `LOOKOUT_EVENT_LOG` file.
pub(crate) fn record_event(event: &str, payload: &impl Serialize) {
    let Some(path) = std::env::var_os(EVENT_LOG_ENV) else {
        return;
    };
    let payload = match serde_json::to_value(payload) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Event {} not serializable: {}", event, e);
            return;
        }
    };
    let line = serde_json::json!({
        "event": event,
        "timestamp": crate::capture::now_iso(),
        "payload": payload,
    });
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| writeln!(file, "{}", line));
    if let Err(e) = written {
        log::debug!("Event log {:?} not written: {}", path, e);
    }
}
