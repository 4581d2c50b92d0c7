use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faultline_grid::{partition_of, GridMap, MapEvent, PartitionId};
use parking_lot::Mutex;

use crate::model::TaskStatus;

/// The grid map holding the `task id -> status` projection of every
/// non-terminal task.
pub(crate) const TASKS_MAP: &str = "tasks";

#[derive(Clone)]
/// The distributed task registry.
///
/// One entry per in-flight task; the partition owning an entry's key decides
/// which node reacts to its mutations. Cheap to clone.
pub struct TaskRegistry {
    map: GridMap<TaskStatus>,
    listener_registered: Arc<AtomicBool>,
    events: Arc<Mutex<Option<flume::Receiver<MapEvent<TaskStatus>>>>>,
}

impl TaskRegistry {
    pub(crate) fn new(map: GridMap<TaskStatus>) -> Self {
        Self {
            map,
            listener_registered: Arc::new(AtomicBool::new(false)),
            events: Arc::new(Mutex::new(None)),
        }
    }

    /// Inserts the entry only if absent.
    ///
    /// Never overwrites: a racing node may already consider itself
    /// authoritative for the task. Registers the local entry listener on
    /// first use.
    pub fn add(&self, task_id: &str, status: TaskStatus) {
        self.ensure_listener();
        if self.map.put_if_absent(task_id, status).is_some() {
            debug!(task_id, "Registry entry already present, leaving it untouched.");
        }
    }

    /// Replaces the entry if present; degrades to [`TaskRegistry::add`]
    /// when absent.
    pub fn update(&self, task_id: &str, status: TaskStatus) {
        if self.map.replace(task_id, status).is_none() {
            self.add(task_id, status);
        }
    }

    /// Deletes the entry unconditionally.
    ///
    /// Used on terminal status transitions and on cleanup of stale tracking.
    pub fn remove(&self, task_id: &str) {
        self.map.remove(task_id);
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.map.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.map.contains_key(task_id)
    }

    /// The registry keys this node currently owns.
    pub fn local_key_set(&self) -> Vec<String> {
        self.map.local_key_set()
    }

    /// The locally owned registry keys belonging to one partition.
    pub fn local_keys_in_partition(&self, partition: PartitionId) -> Vec<String> {
        self.map
            .local_key_set()
            .into_iter()
            .filter(|key| partition_of(key) == partition)
            .collect()
    }

    /// Registers the local entry listener exactly once, returning the event
    /// channel. Repeat calls return the already-registered channel.
    pub(crate) fn ensure_listener(&self) -> flume::Receiver<MapEvent<TaskStatus>> {
        let mut events = self.events.lock();
        if !self.listener_registered.swap(true, Ordering::SeqCst) {
            *events = Some(self.map.add_local_listener());
        }
        events
            .as_ref()
            .expect("listener registration flag set without a channel")
            .clone()
    }
}
