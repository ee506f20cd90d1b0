use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::types::CacheSnapshot;

/// Event name for snapshot pushes
pub const EXCEL_DATA_UPDATED: &str = "excel-data-updated";
/// Event name for watcher failures
pub const EXCEL_WATCH_ERROR: &str = "excel-watch-error";

/// Message delivered to the UI surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum UiMessage {
    #[serde(rename = "excel-data-updated")]
    DataUpdated(Arc<CacheSnapshot>),
    #[serde(rename = "excel-watch-error")]
    WatchError(String),
}

impl UiMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            UiMessage::DataUpdated(_) => EXCEL_DATA_UPDATED,
            UiMessage::WatchError(_) => EXCEL_WATCH_ERROR,
        }
    }
}

/// A UI surface that can receive cache updates
pub trait UpdateSink: Send + Sync {
    /// Whether the surface still exists (window open, contents alive)
    fn is_alive(&self) -> bool;

    fn emit(&self, message: UiMessage) -> Result<(), String>;
}

/// Sink backed by an unbounded tokio channel
pub struct ChannelSink {
    sender: UnboundedSender<UiMessage>,
}

impl ChannelSink {
    pub fn channel() -> (Self, UnboundedReceiver<UiMessage>) {
        let (sender, receiver) = unbounded_channel();
        (ChannelSink { sender }, receiver)
    }
}

impl UpdateSink for ChannelSink {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    fn emit(&self, message: UiMessage) -> Result<(), String> {
        self.sender.send(message).map_err(|e| e.to_string())
    }
}

/// Pushes cache updates to whichever UI surface is attached. Sends with no
/// live surface are dropped, and transport errors never reach the caller.
#[derive(Default)]
pub struct UpdateBroadcaster {
    sink: RwLock<Option<Arc<dyn UpdateSink>>>,
}

impl UpdateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sink: Arc<dyn UpdateSink>) {
        *self.sink.write().unwrap_or_else(|p| p.into_inner()) = Some(sink);
    }

    pub fn detach(&self) {
        *self.sink.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Send the snapshot as an `excel-data-updated` event
    pub fn broadcast(&self, snapshot: Arc<CacheSnapshot>) {
        self.send(UiMessage::DataUpdated(snapshot));
    }

    /// Send a watcher failure as an `excel-watch-error` event
    pub fn watch_error(&self, message: impl Into<String>) {
        self.send(UiMessage::WatchError(message.into()));
    }

    fn send(&self, message: UiMessage) {
        let sink = self.sink.read().unwrap_or_else(|p| p.into_inner()).clone();
        let Some(sink) = sink.filter(|s| s.is_alive()) else {
            return;
        };

        let event = message.event_name();
        if let Err(e) = sink.emit(message) {
            tracing::debug!(event, "Dropped UI update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl UpdateSink for FailingSink {
        fn is_alive(&self) -> bool {
            true
        }

        fn emit(&self, _message: UiMessage) -> Result<(), String> {
            Err("window destroyed".to_string())
        }
    }

    #[test]
    fn test_broadcast_without_sink_is_noop() {
        let broadcaster = UpdateBroadcaster::new();
        broadcaster.broadcast(Arc::new(CacheSnapshot::default()));
    }

    #[test]
    fn test_broadcast_reaches_sink() {
        let broadcaster = UpdateBroadcaster::new();
        let (sink, mut rx) = ChannelSink::channel();
        broadcaster.attach(Arc::new(sink));

        let snapshot = Arc::new(CacheSnapshot::default());
        broadcaster.broadcast(snapshot.clone());
        broadcaster.watch_error("boom");

        assert_eq!(rx.try_recv().unwrap(), UiMessage::DataUpdated(snapshot));
        assert_eq!(rx.try_recv().unwrap(), UiMessage::WatchError("boom".to_string()));
    }

    #[test]
    fn test_closed_sink_is_skipped() {
        let broadcaster = UpdateBroadcaster::new();
        let (sink, rx) = ChannelSink::channel();
        broadcaster.attach(Arc::new(sink));
        drop(rx);

        broadcaster.broadcast(Arc::new(CacheSnapshot::default()));
    }

    #[test]
    fn test_transport_errors_are_swallowed() {
        let broadcaster = UpdateBroadcaster::new();
        broadcaster.attach(Arc::new(FailingSink));
        broadcaster.watch_error("boom");
    }

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(UiMessage::WatchError("boom".to_string())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "event": "excel-watch-error", "payload": "boom" })
        );
    }
}
