//! Authoritative in-memory device state with serialized updates.
//!
//! All mutation funnels through [`StateStore::update`]: a single critical
//! section that clones the current state, applies the mutation to the private
//! copy, and atomically replaces the authoritative `Arc` while bumping a
//! monotonic revision. Readers hold cheap `Arc` snapshots and never observe a
//! partial mutation. Durable writes and listener notifications are dispatched
//! after the lock is released.

use crate::error::Result;
use chrono::{DateTime, Utc};
use labswitch_types::{SpanningTreeInstance, Switch, SwitchTrafficStats, VlanId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// The full simulated device state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Switches keyed by identity
    pub switches: BTreeMap<String, Switch>,
    /// Spanning-Tree instances, one per switch
    pub stp: BTreeMap<String, SpanningTreeInstance>,
    /// Traffic statistics, one entry per switch
    pub traffic: BTreeMap<String, SwitchTrafficStats>,
    /// Timestamp of the last committed update
    pub last_updated: Option<DateTime<Utc>>,
}

/// An immutable view of the state at one revision.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: Arc<NetworkState>,
    pub revision: u64,
}

/// Describes what a committed update touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    SwitchCreated { switch_id: String },
    SwitchUpdated { switch_id: String },
    SwitchDeleted { switch_id: String },
    PortUpdated { switch_id: String, port_id: u8 },
    VlanCreated { switch_id: String, vlan_id: VlanId },
    VlanUpdated { switch_id: String, vlan_id: VlanId },
    VlanDeleted { switch_id: String, vlan_id: VlanId },
    StpUpdated { switch_id: String },
    TrafficUpdated { switch_id: String },
}

impl ChangeKind {
    /// The switch this change concerns.
    pub fn switch_id(&self) -> &str {
        match self {
            ChangeKind::SwitchCreated { switch_id }
            | ChangeKind::SwitchUpdated { switch_id }
            | ChangeKind::SwitchDeleted { switch_id }
            | ChangeKind::PortUpdated { switch_id, .. }
            | ChangeKind::VlanCreated { switch_id, .. }
            | ChangeKind::VlanUpdated { switch_id, .. }
            | ChangeKind::VlanDeleted { switch_id, .. }
            | ChangeKind::StpUpdated { switch_id }
            | ChangeKind::TrafficUpdated { switch_id } => switch_id,
        }
    }

    /// True for mutations of the switch entity itself (ports, VLANs,
    /// metadata) as opposed to derived STP/traffic state.
    pub fn is_entity_mutation(&self) -> bool {
        !matches!(
            self,
            ChangeKind::StpUpdated { .. } | ChangeKind::TrafficUpdated { .. }
        )
    }
}

/// Notification delivered to store listeners after a commit.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Revision the commit produced
    pub revision: u64,
    /// What changed
    pub kind: ChangeKind,
}

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Authoritative {
    state: Arc<NetworkState>,
    revision: u64,
}

/// Serialized-update state store.
pub struct StateStore {
    inner: Mutex<Authoritative>,
    listeners: Mutex<Vec<Listener>>,
    dirty: AtomicBool,
    dirty_notify: Notify,
}

impl StateStore {
    /// Creates a store seeded with the given state at revision 0.
    pub fn new(initial: NetworkState) -> Self {
        Self {
            inner: Mutex::new(Authoritative {
                state: Arc::new(initial),
                revision: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            dirty: AtomicBool::new(false),
            dirty_notify: Notify::new(),
        }
    }

    /// Returns an immutable snapshot of the current state.
    pub fn read(&self) -> Snapshot {
        let inner = self.inner.lock().expect("store lock poisoned");
        Snapshot {
            state: Arc::clone(&inner.state),
            revision: inner.revision,
        }
    }

    /// Applies a mutation under the serialized update path.
    ///
    /// The closure mutates a private copy; on `Ok` the copy atomically
    /// replaces the authoritative state, the revision is bumped, and -- after
    /// the lock is released -- the dirty flag is raised for the persistence
    /// task and listeners are invoked synchronously in registration order.
    /// On `Err` the authoritative state is untouched and nothing is notified.
    pub fn update<T>(
        &self,
        kind: ChangeKind,
        f: impl FnOnce(&mut NetworkState) -> Result<T>,
    ) -> Result<T> {
        let (value, event) = {
            let mut inner = self.inner.lock().expect("store lock poisoned");
            let mut copy = (*inner.state).clone();
            let value = f(&mut copy)?;
            copy.last_updated = Some(Utc::now());
            inner.revision += 1;
            inner.state = Arc::new(copy);
            (
                value,
                StoreEvent {
                    revision: inner.revision,
                    kind,
                },
            )
        };

        self.mark_dirty();
        self.notify(&event);
        Ok(value)
    }

    /// Registers a change listener. Listeners run synchronously after each
    /// commit, in registration order.
    pub fn subscribe_changes(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    fn notify(&self, event: &StoreEvent) {
        // Copy the list out so a listener that commits its own update does
        // not re-enter the lock.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .clone();
        for listener in listeners {
            listener(event);
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.dirty_notify.notify_one();
    }

    /// Re-raises the dirty flag, used when a save attempt failed.
    pub fn mark_save_failed(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Takes the dirty flag, returning whether a save is needed.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Resolves when a commit has raised the dirty flag.
    pub async fn dirty_notified(&self) {
        self.dirty_notify.notified().await;
    }
}
