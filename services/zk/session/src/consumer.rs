//! Hand-off points to the event consumer.
//!
//! The session engine never processes completions itself: finished packets
//! and watcher events are passed to an [`EventConsumer`] and the dispatch
//! loop moves on.

use crate::packet::Packet;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use zk_wire::WatcherEvent;

/// Connection-level state reported alongside watcher events
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    /// Connection to the server was lost
    Disconnected = 0,
    /// Connected and the session is valid
    SyncConnected = 3,
    /// Authentication failed
    AuthFailed = 4,
    /// Connected to a read-only server
    ConnectedReadOnly = 5,
    /// SASL authentication succeeded
    SaslAuthenticated = 6,
    /// Session expired
    Expired = -112,
    /// Unrecognised state code
    Unknown = i32::MIN,
}

impl From<i32> for KeeperState {
    fn from(code: i32) -> Self {
        match code {
            0 => KeeperState::Disconnected,
            3 => KeeperState::SyncConnected,
            4 => KeeperState::AuthFailed,
            5 => KeeperState::ConnectedReadOnly,
            6 => KeeperState::SaslAuthenticated,
            -112 => KeeperState::Expired,
            _ => KeeperState::Unknown,
        }
    }
}

/// Kind of change a watch fired for
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// State change only, no node involved
    None = -1,
    /// Node was created
    NodeCreated = 1,
    /// Node was deleted
    NodeDeleted = 2,
    /// Node data changed
    NodeDataChanged = 3,
    /// Node children changed
    NodeChildrenChanged = 4,
    /// Unrecognised event code
    Unknown = i32::MIN,
}

impl From<i32> for EventType {
    fn from(code: i32) -> Self {
        match code {
            -1 => EventType::None,
            1 => EventType::NodeCreated,
            2 => EventType::NodeDeleted,
            3 => EventType::NodeDataChanged,
            4 => EventType::NodeChildrenChanged,
            _ => EventType::Unknown,
        }
    }
}

/// Event delivered to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// Connection state at the time of the event
    pub state: KeeperState,
    /// Kind of change
    pub event_type: EventType,
    /// Client-side path, `None` for pure state changes
    pub path: Option<String>,
}

impl WatchedEvent {
    /// State transition with no node involved
    pub fn state_change(state: KeeperState) -> Self {
        Self {
            state,
            event_type: EventType::None,
            path: None,
        }
    }

    /// Convert a server notification, translating its path out of `chroot`
    pub fn from_notification(event: WatcherEvent, chroot: Option<&str>) -> Self {
        let path = match chroot {
            Some(chroot) => strip_chroot(&event.path, chroot),
            None => event.path,
        };
        Self {
            state: KeeperState::from(event.state),
            event_type: EventType::from(event.event_type),
            path: Some(path),
        }
    }
}

impl fmt::Display for WatchedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WatchedEvent state:{:?} type:{:?} path:{}",
            self.state,
            self.event_type,
            self.path.as_deref().unwrap_or("null")
        )
    }
}

/// Translate a server path to a client path
pub fn strip_chroot(server_path: &str, chroot: &str) -> String {
    if server_path == chroot {
        return "/".to_string();
    }
    match server_path.strip_prefix(chroot) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => {
            debug!("Path {} is outside chroot {}", server_path, chroot);
            server_path.to_string()
        }
    }
}

/// Receiver of finished packets and watcher events
pub trait EventConsumer: Send + Sync + fmt::Debug {
    /// Hand off a watcher or state event
    fn queue_event(&self, event: WatchedEvent);
    /// Hand off a finished packet
    fn queue_packet(&self, packet: Packet);
}

/// One item handed to a [`ChannelConsumer`]
#[derive(Debug)]
pub enum Delivery {
    /// Watcher or state event
    Event(WatchedEvent),
    /// Finished packet
    Packet(Packet),
}

/// Consumer forwarding everything, in order, over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelConsumer {
    /// Create a consumer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventConsumer for ChannelConsumer {
    fn queue_event(&self, event: WatchedEvent) {
        if self.tx.send(Delivery::Event(event)).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn queue_packet(&self, packet: Packet) {
        if self.tx.send(Delivery::Packet(packet)).is_err() {
            debug!("Packet receiver dropped");
        }
    }
}

/// Watches currently registered by the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSnapshot {
    /// Paths with data watches
    pub data: Vec<String>,
    /// Paths with exists watches
    pub exist: Vec<String>,
    /// Paths with child watches
    pub child: Vec<String>,
}

impl WatchSnapshot {
    /// Whether no watch of any kind is registered
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.exist.is_empty() && self.child.is_empty()
    }
}

/// Source of registered watches for re-registration after reconnect
pub trait WatchSource: Send + Sync + fmt::Debug {
    /// Current set of registered watches
    fn snapshot(&self) -> WatchSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroot_translation() {
        assert_eq!(strip_chroot("/app/node1", "/app"), "/node1");
        assert_eq!(strip_chroot("/app", "/app"), "/");
        assert_eq!(strip_chroot("/application", "/app"), "/application");
    }

    #[test]
    fn test_notification_conversion() {
        let event = WatcherEvent {
            event_type: 3,
            state: 3,
            path: "/app/node1".to_string(),
        };
        let watched = WatchedEvent::from_notification(event, Some("/app"));
        assert_eq!(watched.event_type, EventType::NodeDataChanged);
        assert_eq!(watched.state, KeeperState::SyncConnected);
        assert_eq!(watched.path.as_deref(), Some("/node1"));
    }

    #[tokio::test]
    async fn test_channel_consumer_preserves_order() {
        let (consumer, mut rx) = ChannelConsumer::new();
        consumer.queue_event(WatchedEvent::state_change(KeeperState::SyncConnected));
        consumer.queue_event(WatchedEvent::state_change(KeeperState::Disconnected));

        match rx.recv().await {
            Some(Delivery::Event(e)) => assert_eq!(e.state, KeeperState::SyncConnected),
            other => panic!("unexpected delivery: {:?}", other),
        }
        match rx.recv().await {
            Some(Delivery::Event(e)) => assert_eq!(e.state, KeeperState::Disconnected),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }
}
