//! Subscription bookkeeping.
//!
//! The registry maps each [`TopicKey`] to at most one live
//! [`SubscriptionHandle`]. Handles release themselves by value, so a released
//! subscription cannot be used again.

use std::{collections::BTreeMap, sync::Arc};

use duet_session_models::{SubscriptionEntry, TopicKey};
use thiserror::Error;

use crate::{
    config::Destinations,
    room::RoomIdentifier,
    transport::{TransportError, TransportSink},
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Topic {0} already has an active subscription")]
    Occupied(TopicKey),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One server-side subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: TopicKey,
    id: String,
    destination: String,
    sink: Arc<dyn TransportSink>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Unsubscribes. Failures are logged and ignored.
    pub fn release(self) {
        log::debug!(
            "release: key={} id={} destination={}",
            self.key,
            self.id,
            self.destination
        );
        if let Err(e) = self.sink.unsubscribe(&self.id) {
            log::debug!("release: Failed to unsubscribe {}: {e}", self.id);
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<TopicKey, SubscriptionHandle>,
    next_id: u64,
}

impl SubscriptionRegistry {
    /// Subscribes `destination` under `key`.
    ///
    /// # Errors
    ///
    /// * [`RegistryError::Occupied`] if `key` already has a live handle
    /// * [`RegistryError::Transport`] if the subscribe frame cannot be queued
    pub fn subscribe(
        &mut self,
        sink: &Arc<dyn TransportSink>,
        key: TopicKey,
        destination: String,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Occupied(key));
        }

        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;

        sink.subscribe(&id, &destination)?;
        log::debug!("subscribe: key={key} id={id} destination={destination}");

        self.entries.insert(
            key,
            SubscriptionHandle {
                key,
                id,
                destination,
                sink: sink.clone(),
            },
        );

        Ok(())
    }

    /// Releases the handle under `key`, if any.
    pub fn release(&mut self, key: TopicKey) -> bool {
        let Some(handle) = self.entries.remove(&key) else {
            return false;
        };
        handle.release();
        true
    }

    /// Subscribes every standing topic that has no live handle yet.
    ///
    /// # Errors
    ///
    /// * If a subscribe frame cannot be queued
    pub fn ensure_standing(
        &mut self,
        sink: &Arc<dyn TransportSink>,
        destinations: &Destinations,
    ) -> Result<(), RegistryError> {
        for key in TopicKey::STANDING {
            if self.entries.contains_key(&key) {
                continue;
            }
            if let Some(destination) = destinations.standing(key) {
                self.subscribe(sink, key, destination.to_string())?;
            }
        }

        Ok(())
    }

    /// Replaces the room subscriptions with ones for `room`.
    ///
    /// The normalized topic is only subscribed when it differs from the raw one.
    ///
    /// # Errors
    ///
    /// * If a subscribe frame cannot be queued
    pub fn subscribe_room(
        &mut self,
        sink: &Arc<dyn TransportSink>,
        destinations: &Destinations,
        room: &RoomIdentifier,
    ) -> Result<(), RegistryError> {
        self.release_room();

        self.subscribe(sink, TopicKey::Chat, destinations.room_topic(&room.raw))?;

        if room.needs_normalized_topic() {
            self.subscribe(
                sink,
                TopicKey::ChatNormalized,
                destinations.room_topic(&room.normalized),
            )?;
        }

        Ok(())
    }

    pub fn release_room(&mut self) {
        self.release(TopicKey::Chat);
        self.release(TopicKey::ChatNormalized);
    }

    /// Releases every handle.
    pub fn clear(&mut self) {
        for handle in std::mem::take(&mut self.entries).into_values() {
            handle.release();
        }
    }

    /// Maps a server subscription id back to its topic.
    #[must_use]
    pub fn key_for(&self, subscription_id: &str) -> Option<TopicKey> {
        self.entries
            .values()
            .find(|handle| handle.id == subscription_id)
            .map(|handle| handle.key)
    }

    #[must_use]
    pub fn get(&self, key: TopicKey) -> Option<&SubscriptionHandle> {
        self.entries.get(&key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<SubscriptionEntry> {
        self.entries
            .values()
            .map(|handle| SubscriptionEntry {
                topic_key: handle.key,
                topic_address: handle.destination.clone(),
                active: true,
            })
            .collect()
    }
}
