//! Active subscription bookkeeping

use serde::Serialize;
use uuid::Uuid;

/// A subscription as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribedTopic {
    pub id: Uuid,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub topic: SubscribedTopic,
    /// Broker-side subscription id; raw WebSocket subscriptions have none
    pub handle: Option<String>,
}

/// Subscriptions in the order they were made
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Vec<Registration>,
    next_handle: u64,
}

impl SubscriptionRegistry {
    /// Allocate the next STOMP subscription id
    pub fn next_handle(&mut self) -> String {
        let handle = format!("sub-{}", self.next_handle);
        self.next_handle += 1;
        handle
    }

    pub fn insert(&mut self, destination: &str, handle: Option<String>) -> SubscribedTopic {
        let topic = SubscribedTopic {
            id: Uuid::new_v4(),
            destination: destination.to_string(),
        };
        self.entries.push(Registration {
            topic: topic.clone(),
            handle,
        });
        topic
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Registration> {
        let pos = self.entries.iter().position(|r| r.topic.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn drain(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.entries)
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.entries
    }

    pub fn topics(&self) -> Vec<SubscribedTopic> {
        self.entries.iter().map(|r| r.topic.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
