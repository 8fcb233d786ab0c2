//! Event bus for device-pushed and engine-emitted events.
//!
//! Devices push events back through the webhook ingestion path; the
//! reconciliation engine emits progress events. Both land here, and the
//! surrounding business layer (out of scope for this engine) subscribes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Events flowing through the fleet engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A device came online (health probe or webhook activity)
    DeviceOnline { device_id: String, timestamp: i64 },
    /// A device went offline
    DeviceOffline { device_id: String, timestamp: i64 },
    /// An access-control decision pushed by a device
    AccessGranted {
        device_id: String,
        employee_no: Option<String>,
        granted: bool,
        timestamp: i64,
    },
    /// Face-recognition match reported by a terminal
    FaceMatch {
        device_id: String,
        employee_no: Option<String>,
        similarity: Option<f64>,
        timestamp: i64,
    },
    /// Card swipe reported by a reader
    CardRead {
        device_id: String,
        card_no: Option<String>,
        timestamp: i64,
    },
    /// Door open/close status change
    DoorStatus {
        device_id: String,
        door_open: bool,
        timestamp: i64,
    },
    /// Device-raised alarm (tamper, forced door, ...)
    AlarmRaised {
        device_id: String,
        alarm_type: String,
        timestamp: i64,
    },
    /// A reconciliation pass finished for a device
    SyncCompleted {
        device_id: String,
        added: usize,
        updated: usize,
        removed: usize,
        failed: usize,
        timestamp: i64,
    },
}

impl FleetEvent {
    /// The device this event concerns.
    pub fn device_id(&self) -> &str {
        match self {
            Self::DeviceOnline { device_id, .. }
            | Self::DeviceOffline { device_id, .. }
            | Self::AccessGranted { device_id, .. }
            | Self::FaceMatch { device_id, .. }
            | Self::CardRead { device_id, .. }
            | Self::DoorStatus { device_id, .. }
            | Self::AlarmRaised { device_id, .. }
            | Self::SyncCompleted { device_id, .. } => device_id,
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event id
    pub event_id: String,
    /// Component that published the event
    pub source: String,
    /// Publish timestamp (unix seconds)
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Broadcast event bus.
///
/// Uses a tokio broadcast channel to distribute events to all subscribers.
/// Events published with no subscribers are discarded; slow subscribers may
/// drop old events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(FleetEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if at least one subscriber received it.
    pub async fn publish(&self, event: FleetEvent) -> bool {
        self.publish_with_source(event, "engine").await
    }

    /// Publish an event with a custom source component.
    pub async fn publish_with_source(
        &self,
        event: FleetEvent,
        source: impl Into<String>,
    ) -> bool {
        let metadata = EventMetadata::new(source);
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Only events for which the filter returns `true` are delivered.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&FleetEvent) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver handle for event bus subscriptions.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(FleetEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` when the bus is closed. Lagged gaps are skipped.
    pub async fn recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(pair) => return Some(pair),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Receiver that only yields events matching its filter.
pub struct FilteredReceiver<F> {
    rx: broadcast::Receiver<(FleetEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&FleetEvent) -> bool + Send + 'static,
{
    /// Receive the next matching event.
    ///
    /// Returns `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<(FleetEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, metadata)) => {
                    if (self.filter)(&event) {
                        return Some((event, metadata));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus subscriber lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(FleetEvent::DeviceOnline {
            device_id: "dev-1".to_string(),
            timestamp: 1,
        })
        .await;

        let (event, meta) = rx.recv().await.unwrap();
        assert_eq!(event.device_id(), "dev-1");
        assert_eq!(meta.source, "engine");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_discarded() {
        let bus = EventBus::new();
        let delivered = bus
            .publish(FleetEvent::DoorStatus {
                device_id: "dev-1".to_string(),
                door_open: true,
                timestamp: 1,
            })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_filtered(|event| {
            matches!(event, FleetEvent::AlarmRaised { .. })
        });

        bus.publish(FleetEvent::DeviceOnline {
            device_id: "dev-1".to_string(),
            timestamp: 1,
        })
        .await;
        bus.publish(FleetEvent::AlarmRaised {
            device_id: "dev-1".to_string(),
            alarm_type: "forced_door".to_string(),
            timestamp: 2,
        })
        .await;

        // The non-matching event is skipped
        let (event, _) = rx.recv().await.unwrap();
        assert!(matches!(event, FleetEvent::AlarmRaised { .. }));
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = FleetEvent::AlarmRaised {
            device_id: "dev-1".to_string(),
            alarm_type: "tamper".to_string(),
            timestamp: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "alarm_raised");
        assert_eq!(json["alarm_type"], "tamper");
    }
}
