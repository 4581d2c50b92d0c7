use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::{partition_of, Grid, NodeId, PartitionId};

#[derive(Clone, Debug)]
/// A mutation observed on a partitioned map.
///
/// Entry events are delivered only to the listener registered on the node
/// which currently owns the entry's partition.
pub enum MapEvent<V> {
    EntryAdded { key: String, value: V },
    EntryUpdated { key: String, value: V },
    EntryRemoved { key: String, value: Option<V> },
    /// The partition's data may have been lost. Surfaced for alerting,
    /// never auto-healed.
    PartitionLost { partition: PartitionId },
}

/// A named, partitioned `String -> V` map.
///
/// Any node may mutate any key; entry events route to the partition owner
/// only. Cheap to clone.
#[derive(Clone)]
pub struct GridMap<V> {
    name: String,
    node_id: NodeId,
    grid: Grid,
    state: MapState<V>,
}

impl<V> GridMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Inserts or overwrites an entry, returning the previous value.
    pub fn put(&self, key: &str, value: V) -> Option<V> {
        let old = self
            .state
            .shared
            .entries
            .write()
            .insert(key.to_string(), value.clone());

        let event = match old {
            Some(_) => MapEvent::EntryUpdated {
                key: key.to_string(),
                value,
            },
            None => MapEvent::EntryAdded {
                key: key.to_string(),
                value,
            },
        };
        self.notify_owner(key, event);

        old
    }

    /// Inserts the entry only if the key is currently absent.
    ///
    /// Returns the existing value when the insert was declined.
    pub fn put_if_absent(&self, key: &str, value: V) -> Option<V> {
        {
            let mut entries = self.state.shared.entries.write();
            if let Some(existing) = entries.get(key) {
                return Some(existing.clone());
            }
            entries.insert(key.to_string(), value.clone());
        }

        self.notify_owner(
            key,
            MapEvent::EntryAdded {
                key: key.to_string(),
                value,
            },
        );
        None
    }

    /// Replaces the entry only if the key is currently present.
    ///
    /// Returns the previous value when the replace applied.
    pub fn replace(&self, key: &str, value: V) -> Option<V> {
        let old = {
            let mut entries = self.state.shared.entries.write();
            if !entries.contains_key(key) {
                return None;
            }
            entries.insert(key.to_string(), value.clone())
        };

        self.notify_owner(
            key,
            MapEvent::EntryUpdated {
                key: key.to_string(),
                value,
            },
        );
        old
    }

    /// Removes an entry unconditionally.
    pub fn remove(&self, key: &str) -> Option<V> {
        let old = self.state.shared.entries.write().remove(key);
        if old.is_some() {
            self.notify_owner(
                key,
                MapEvent::EntryRemoved {
                    key: key.to_string(),
                    value: old.clone(),
                },
            );
        }
        old
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.state.shared.entries.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.shared.entries.read().contains_key(key)
    }

    /// The keys whose partitions the local node currently owns.
    pub fn local_key_set(&self) -> Vec<String> {
        self.state
            .shared
            .entries
            .read()
            .keys()
            .filter(|key| {
                self.grid.partition_owner(partition_of(key)) == Some(self.node_id)
            })
            .cloned()
            .collect()
    }

    /// Registers the local entry listener for this node, replacing any
    /// listener registered before it.
    pub fn add_local_listener(&self) -> flume::Receiver<MapEvent<V>> {
        let (tx, rx) = flume::unbounded();
        self.state
            .shared
            .listeners
            .write()
            .insert(self.node_id, tx);
        rx
    }

    fn notify_owner(&self, key: &str, event: MapEvent<V>) {
        let owner = self.grid.partition_owner(partition_of(key));
        let owner = match owner {
            Some(owner) => owner,
            None => return,
        };

        let listeners = self.state.shared.listeners.read();
        if let Some(tx) = listeners.get(&owner) {
            if tx.send(event).is_err() {
                trace!(
                    map = %self.name,
                    owner,
                    "Owner listener channel closed, dropping map event.",
                );
            }
        }
    }
}

/// The shared backing state of one named map, typed to its value.
struct MapShared<V> {
    entries: RwLock<HashMap<String, V>>,
    listeners: RwLock<BTreeMap<NodeId, flume::Sender<MapEvent<V>>>>,
}

struct MapState<V> {
    shared: Arc<MapShared<V>>,
}

impl<V> Clone for MapState<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> Default for MapState<V> {
    fn default() -> Self {
        Self {
            shared: Arc::new(MapShared {
                entries: RwLock::new(HashMap::new()),
                listeners: RwLock::new(BTreeMap::new()),
            }),
        }
    }
}

/// Type-erased view of a map's state so the registry can hold maps of
/// differing value types and still fan out node-scoped notifications.
trait ErasedMap: Send + Sync {
    fn drop_listener(&self, node_id: NodeId);
    fn notify_partition_lost(&self, node_id: NodeId, partition: PartitionId);
    fn as_any(&self) -> &dyn Any;
}

impl<V> ErasedMap for MapState<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop_listener(&self, node_id: NodeId) {
        self.shared.listeners.write().remove(&node_id);
    }

    fn notify_partition_lost(&self, node_id: NodeId, partition: PartitionId) {
        let listeners = self.shared.listeners.read();
        if let Some(tx) = listeners.get(&node_id) {
            let _ = tx.send(MapEvent::PartitionLost { partition });
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub(crate) struct MapRegistry {
    maps: Mutex<HashMap<String, Box<dyn ErasedMap>>>,
}

impl MapRegistry {
    pub(crate) fn get_or_create<V>(
        &self,
        name: &str,
        node_id: NodeId,
        grid: Grid,
    ) -> GridMap<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut maps = self.maps.lock();
        let entry = maps
            .entry(name.to_string())
            .or_insert_with(|| Box::new(MapState::<V>::default()));

        let state = entry
            .as_any()
            .downcast_ref::<MapState<V>>()
            .expect("map accessed with mismatched value type")
            .clone();

        GridMap {
            name: name.to_string(),
            node_id,
            grid,
            state,
        }
    }

    pub(crate) fn drop_node_listeners(&self, node_id: NodeId) {
        let maps = self.maps.lock();
        for state in maps.values() {
            state.drop_listener(node_id);
        }
    }

    pub(crate) fn notify_partition_lost(&self, node_id: NodeId, partition: PartitionId) {
        let maps = self.maps.lock();
        for state in maps.values() {
            state.notify_partition_lost(node_id, partition);
        }
    }
}
