//! Typed client events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use vitalsync_protocol::ServerMessage;

/// Event categories a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// A link opened.
    Connected,
    /// A link closed.
    Disconnected,
    /// A non-terminal failure.
    Error,
    /// A reconnect attempt is scheduled.
    Reconnecting,
    /// Reconnection gave up.
    MaxReconnectReached,
    /// Inbound messages are now discarded.
    Paused,
    /// Inbound messages are applied again.
    Resumed,
    /// Mirror, metrics and history were cleared.
    DataReset,
    /// `initial_data` was applied.
    InitialData,
    /// `full_data_update` was applied.
    FullDataUpdate,
    /// `full_data` was applied.
    FullData,
    /// `delta_update` was applied.
    DeltaUpdate,
    /// `hybrid_update` was applied.
    HybridUpdate,
    /// `mode_changed` arrived.
    ModeChanged,
    /// `performance_metrics` arrived.
    PerformanceMetrics,
    /// Any server message.
    Message,
}

impl EventTopic {
    /// Returns the topic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Connected => "connected",
            EventTopic::Disconnected => "disconnected",
            EventTopic::Error => "error",
            EventTopic::Reconnecting => "reconnecting",
            EventTopic::MaxReconnectReached => "max_reconnect_reached",
            EventTopic::Paused => "paused",
            EventTopic::Resumed => "resumed",
            EventTopic::DataReset => "data_reset",
            EventTopic::InitialData => "initial_data",
            EventTopic::FullDataUpdate => "full_data_update",
            EventTopic::FullData => "full_data",
            EventTopic::DeltaUpdate => "delta_update",
            EventTopic::HybridUpdate => "hybrid_update",
            EventTopic::ModeChanged => "mode_changed",
            EventTopic::PerformanceMetrics => "performance_metrics",
            EventTopic::Message => "message",
        }
    }

    fn for_message(message: &ServerMessage) -> Self {
        match message {
            ServerMessage::InitialData { .. } => EventTopic::InitialData,
            ServerMessage::FullDataUpdate { .. } => EventTopic::FullDataUpdate,
            ServerMessage::FullData { .. } => EventTopic::FullData,
            ServerMessage::DeltaUpdate { .. } => EventTopic::DeltaUpdate,
            ServerMessage::HybridUpdate { .. } => EventTopic::HybridUpdate,
            ServerMessage::ModeChanged { .. } => EventTopic::ModeChanged,
            ServerMessage::PerformanceMetrics { .. } => EventTopic::PerformanceMetrics,
        }
    }
}

impl std::fmt::Display for EventTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A link opened.
    Connected {
        /// Server URL.
        endpoint: String,
    },
    /// A link closed.
    Disconnected {
        /// Close code, 1006 when the link dropped without one.
        code: u16,
        /// Close reason.
        reason: String,
        /// True for a normal close.
        clean: bool,
    },
    /// A non-terminal failure.
    Error(String),
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Reconnection gave up. Fires once per outage.
    MaxReconnectReached {
        /// Attempts made.
        attempts: u32,
    },
    /// Inbound messages are now discarded.
    Paused,
    /// Inbound messages are applied again.
    Resumed,
    /// Mirror, metrics and history were cleared.
    DataReset,
    /// A server message was processed.
    Message(Arc<ServerMessage>),
}

impl ClientEvent {
    /// Returns the specific topic of this event.
    pub fn topic(&self) -> EventTopic {
        match self {
            ClientEvent::Connected { .. } => EventTopic::Connected,
            ClientEvent::Disconnected { .. } => EventTopic::Disconnected,
            ClientEvent::Error(_) => EventTopic::Error,
            ClientEvent::Reconnecting { .. } => EventTopic::Reconnecting,
            ClientEvent::MaxReconnectReached { .. } => EventTopic::MaxReconnectReached,
            ClientEvent::Paused => EventTopic::Paused,
            ClientEvent::Resumed => EventTopic::Resumed,
            ClientEvent::DataReset => EventTopic::DataReset,
            ClientEvent::Message(message) => EventTopic::for_message(message),
        }
    }

    /// Returns true if the event belongs to `topic`. Every message event
    /// also belongs to [`EventTopic::Message`].
    pub fn matches(&self, topic: EventTopic) -> bool {
        self.topic() == topic || (topic == EventTopic::Message && self.message().is_some())
    }

    /// Returns the server message carried by a message event.
    pub fn message(&self) -> Option<&ServerMessage> {
        match self {
            ClientEvent::Message(message) => Some(message.as_ref()),
            _ => None,
        }
    }
}

/// A subscription to client events, optionally filtered by topic.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ClientEvent>,
    topics: Vec<EventTopic>,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<ClientEvent>, topics: Vec<EventTopic>) -> Self {
        Self { rx, topics }
    }

    /// Waits for the next matching event. Returns `None` once the client is
    /// gone. Events missed by a lagging subscriber are skipped.
    pub async fn next(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event that is already queued.
    pub fn try_next(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    fn accepts(&self, event: &ClientEvent) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|topic| event.matches(*topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vitalsync_protocol::UpdateMode;

    #[test]
    fn message_events_match_their_type_and_catch_all() {
        let event = ClientEvent::Message(Arc::new(ServerMessage::ModeChanged {
            mode: UpdateMode::Hybrid,
            timestamp: Utc::now(),
        }));
        assert_eq!(event.topic(), EventTopic::ModeChanged);
        assert!(event.matches(EventTopic::Message));
        assert!(!event.matches(EventTopic::DeltaUpdate));
        assert!(!ClientEvent::Paused.matches(EventTopic::Message));
    }

    #[test]
    fn topic_names_follow_message_types() {
        for kind in ServerMessage::TYPES {
            let topic = [
                EventTopic::InitialData,
                EventTopic::FullDataUpdate,
                EventTopic::FullData,
                EventTopic::DeltaUpdate,
                EventTopic::HybridUpdate,
                EventTopic::ModeChanged,
                EventTopic::PerformanceMetrics,
            ]
            .into_iter()
            .find(|topic| topic.as_str() == kind);
            assert!(topic.is_some(), "no topic for {kind}");
        }
    }

    #[tokio::test]
    async fn stream_filters_topics() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = EventStream::new(rx, vec![EventTopic::Resumed]);
        tx.send(ClientEvent::Paused).unwrap();
        tx.send(ClientEvent::Resumed).unwrap();
        assert!(matches!(stream.next().await, Some(ClientEvent::Resumed)));
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
