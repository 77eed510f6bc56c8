//! Registry events
//!
//! Publishing never blocks the caller: events are handed to the publisher
//! once the transaction committed, and a publisher without listeners drops
//! them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::device::EndDeviceIdentifiers;
use crate::path::PathSet;

/// End device created
pub const EVT_CREATE_END_DEVICE: &str = "ns.end_device.create";
/// End device updated
pub const EVT_UPDATE_END_DEVICE: &str = "ns.end_device.update";
/// End device deleted
pub const EVT_DELETE_END_DEVICE: &str = "ns.end_device.delete";
/// End devices deleted in a batch
pub const EVT_BATCH_DELETE_END_DEVICES: &str = "ns.end_device.batch.delete";

/// Registry event
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Event name
    pub name: &'static str,
    /// Time of publication
    pub time: DateTime<Utc>,
    /// Devices the event is about
    pub identifiers: Vec<EndDeviceIdentifiers>,
    /// Event payload
    pub data: Option<Value>,
}

impl Event {
    /// Event `name` about `identifiers`
    pub fn new(name: &'static str, identifiers: Vec<EndDeviceIdentifiers>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            time: Utc::now(),
            identifiers,
            data: None,
        }
    }

    /// Update event carrying the written paths
    pub fn update(ids: EndDeviceIdentifiers, paths: &PathSet) -> Self {
        let mut event = Self::new(EVT_UPDATE_END_DEVICE, vec![ids]);
        event.data = serde_json::to_value(paths).ok();
        event
    }
}

/// Sink for registry events
pub trait EventPublisher: Send + Sync {
    /// Publish `event`
    fn publish(&self, event: Event);
}

/// Publisher fanning events out to broadcast subscribers
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<Event>,
}

impl BroadcastPublisher {
    /// Publisher buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver of every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: Event) {
        // Fails only without subscribers.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast() {
        let publisher = BroadcastPublisher::new(8);
        publisher.publish(Event::new(EVT_DELETE_END_DEVICE, Vec::new()));

        let mut rx = publisher.subscribe();
        let ids = EndDeviceIdentifiers::new("app", "dev");
        publisher.publish(Event::update(ids.clone(), &PathSet::from_strs(&["frequency_plan_id"])));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, EVT_UPDATE_END_DEVICE);
        assert_eq!(event.identifiers, vec![ids]);
        assert_eq!(event.data, Some(serde_json::json!(["frequency_plan_id"])));
    }
}
