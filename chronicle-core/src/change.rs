//! Change notification for stored series.
//!
//! A [`ChangeManager`] fans entity-change events out to registered
//! [`ChangeListener`]s. Sources own one and publish on it whenever a stored
//! series is added, changed or removed; the caching layer subscribes to the
//! source's manager and republishes on its own.

use crate::ObjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Point in time used for version bounds on change events.
pub type Timestamp = DateTime<Utc>;

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Changed,
    Removed,
}

/// A change to one stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    /// The entity affected. Every version of it is considered stale.
    pub object_id: ObjectId,
    /// Start of the version range that was replaced, if known.
    pub version_from: Option<Timestamp>,
    /// End of the version range that was replaced, if known.
    pub version_to: Option<Timestamp>,
    /// When the change happened.
    pub version_instant: Timestamp,
}

impl ChangeEvent {
    pub fn new(change_type: ChangeType, object_id: ObjectId) -> Self {
        Self {
            change_type,
            object_id,
            version_from: None,
            version_to: None,
            version_instant: Utc::now(),
        }
    }

    pub fn with_versions(mut self, from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        self.version_from = from;
        self.version_to = to;
        self
    }
}

/// Receives change events from a [`ChangeManager`].
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn entity_changed(&self, event: &ChangeEvent);
}

/// Handle returned by [`ChangeManager::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of change listeners.
///
/// Listeners are notified in registration order. The registry lock is not
/// held while listeners run, so a listener may add or remove listeners
/// (including itself) without deadlocking.
#[derive(Default)]
pub struct ChangeManager {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl fmt::Debug for ChangeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeManager").finish_non_exhaustive()
    }
}

impl ChangeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.write().await.push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Build an event and publish it.
    pub async fn entity_changed(
        &self,
        change_type: ChangeType,
        object_id: ObjectId,
        version_from: Option<Timestamp>,
        version_to: Option<Timestamp>,
        version_instant: Timestamp,
    ) {
        let event = ChangeEvent {
            version_instant,
            ..ChangeEvent::new(change_type, object_id).with_versions(version_from, version_to)
        };
        self.publish(&event).await;
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub async fn publish(&self, event: &ChangeEvent) {
        let snapshot: Vec<Arc<dyn ChangeListener>> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener.entity_changed(event).await;
        }
    }
}
