//! # Faultline Grid
//! An embedded, in-process coordination grid.
//!
//! The grid provides the distributed primitives the failover coordinator is
//! built on: partitioned key-value maps with owner-local entry listeners,
//! membership and partition-migration notifications, quorum presence events
//! and a broadcast topic which loops messages back to the publisher.
//!
//! Every node in the grid lives in the same process and shares one
//! [`Grid`]. Joining returns a [`GridHandle`] scoped to that node; all
//! events for a node are delivered in order over a single channel, one at a
//! time, which is the serialization guarantee the handlers above this crate
//! rely on for their idempotency checks.

mod error;
mod event;
mod extension;
mod map;
mod member;
mod partition;
mod topic;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use error::GridError;
pub use event::GridEvent;
pub use extension::GridExtension;
pub use map::{GridMap, MapEvent};
pub use member::{GridMember, NodeId};
pub use partition::{partition_of, PartitionId, PARTITION_COUNT};
pub use topic::{GridTopic, TopicMessage};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::map::MapRegistry;
use crate::partition::PartitionTable;
use crate::topic::TopicRegistry;

/// A single in-process coordination grid shared by every node handle.
///
/// Cheap to clone; clones refer to the same grid state.
#[derive(Clone)]
pub struct Grid {
    state: Arc<GridState>,
}

pub(crate) struct GridState {
    minimum_quorum: usize,
    members: RwLock<BTreeMap<NodeId, GridMember>>,
    partitions: Mutex<PartitionTable>,
    subscribers: RwLock<BTreeMap<NodeId, flume::Sender<GridEvent>>>,
    maps: MapRegistry,
    topics: TopicRegistry,
    quorum_present: Mutex<bool>,
}

impl Grid {
    /// Creates a new, empty grid.
    ///
    /// `minimum_quorum` is the number of members that must be present for the
    /// grid to report quorum. The grid starts with no members and therefore
    /// without quorum.
    pub fn new(minimum_quorum: usize) -> Self {
        Self {
            state: Arc::new(GridState {
                minimum_quorum,
                members: RwLock::new(BTreeMap::new()),
                partitions: Mutex::new(PartitionTable::default()),
                subscribers: RwLock::new(BTreeMap::new()),
                maps: MapRegistry::default(),
                topics: TopicRegistry::default(),
                quorum_present: Mutex::new(false),
            }),
        }
    }

    /// Joins a new member to the grid, returning the handle scoped to it.
    ///
    /// Joining rebalances the partition table, emitting a
    /// migration-started/migration-completed pair for every partition which
    /// moves to the new member, after the member-added notification.
    pub fn join(&self, member: GridMember) -> Result<GridHandle, GridError> {
        let (events_tx, events_rx) = flume::unbounded();

        {
            let mut members = self.state.members.write();
            if members.contains_key(&member.node_id) {
                return Err(GridError::AlreadyJoined(member.node_id));
            }
            members.insert(member.node_id, member.clone());
        }
        self.state
            .subscribers
            .write()
            .insert(member.node_id, events_tx);

        info!(node_id = member.node_id, public_addr = %member.public_addr, "Member joined the grid.");

        self.evaluate_quorum();
        self.broadcast(GridEvent::MemberAdded {
            member: member.clone(),
        });
        self.rebalance();

        Ok(GridHandle {
            me: member,
            grid: self.clone(),
            events: events_rx,
        })
    }

    /// Removes a member from the grid, simulating a node crash or shutdown.
    ///
    /// The remaining members observe a member-removed notification followed
    /// by the migration pairs redistributing the dead member's partitions.
    pub fn remove_node(&self, node_id: NodeId) -> Result<(), GridError> {
        let (member, remaining) = {
            let mut members = self.state.members.write();
            let member = members
                .remove(&node_id)
                .ok_or(GridError::UnknownMember(node_id))?;
            (member, members.values().cloned().collect::<Vec<_>>())
        };
        self.state.subscribers.write().remove(&node_id);
        self.state.maps.drop_node_listeners(node_id);
        self.state.topics.drop_node_subscribers(node_id);

        warn!(node_id, public_addr = %member.public_addr, "Member left the grid.");

        self.evaluate_quorum();
        self.broadcast(GridEvent::MemberRemoved { member, remaining });
        self.rebalance();

        Ok(())
    }

    /// All current grid members, ordered by node id.
    pub fn members(&self) -> Vec<GridMember> {
        self.state.members.read().values().cloned().collect()
    }

    /// Whether the grid currently has quorum.
    pub fn quorum_present(&self) -> bool {
        *self.state.quorum_present.lock()
    }

    /// The node currently owning the given partition.
    pub fn partition_owner(&self, partition: PartitionId) -> Option<NodeId> {
        self.state.partitions.lock().owner(partition)
    }

    /// Marks a partition as lost, notifying the owning node's map listeners.
    ///
    /// This only surfaces the event; no registry state is touched. It exists
    /// so operational alerting paths can be exercised.
    pub fn partition_lost(&self, partition: PartitionId) {
        let owner = self.partition_owner(partition);
        if let Some(owner) = owner {
            self.state.maps.notify_partition_lost(owner, partition);
        }
    }

    fn broadcast(&self, event: GridEvent) {
        let subscribers = self.state.subscribers.read();
        for (node_id, tx) in subscribers.iter() {
            if tx.send(event.clone()).is_err() {
                debug!(node_id, "Subscriber channel closed, skipping delivery.");
            }
        }
    }

    /// Re-evaluates quorum presence, emitting a change event on transitions.
    fn evaluate_quorum(&self) {
        let members = self.members();
        let present = members.len() >= self.state.minimum_quorum;

        let mut current = self.state.quorum_present.lock();
        if *current != present {
            *current = present;
            info!(
                present,
                num_members = members.len(),
                minimum = self.state.minimum_quorum,
                "Grid quorum presence changed.",
            );
            self.broadcast(GridEvent::QuorumChanged { present, members });
        }
    }

    /// Recomputes the partition table for the current member set and emits
    /// migration events for every partition whose owner changed.
    ///
    /// A migration-started event always precedes the matching
    /// migration-completed event for the same partition.
    fn rebalance(&self) {
        let members: Vec<NodeId> = self.state.members.read().keys().copied().collect();
        let moves = self.state.partitions.lock().rebalance(&members);

        for migration in moves {
            self.broadcast(GridEvent::MigrationStarted {
                partition: migration.partition,
                old_owner: migration.old_owner,
                new_owner: migration.new_owner,
            });
            self.broadcast(GridEvent::MigrationCompleted {
                partition: migration.partition,
                old_owner: migration.old_owner,
                new_owner: migration.new_owner,
            });
        }
    }
}

/// A per-node handle onto the grid.
///
/// The handle is the narrow interface consumed by everything above this
/// crate: map access, partition routing, the event channel and the broadcast
/// topic.
#[derive(Clone)]
pub struct GridHandle {
    me: GridMember,
    grid: Grid,
    events: flume::Receiver<GridEvent>,
}

impl GridHandle {
    /// The local member identity.
    pub fn me(&self) -> &GridMember {
        &self.me
    }

    /// The local node id.
    pub fn node_id(&self) -> NodeId {
        self.me.node_id
    }

    /// All current grid members.
    pub fn members(&self) -> Vec<GridMember> {
        self.grid.members()
    }

    /// The ordered event channel for this node.
    ///
    /// Membership, migration and quorum notifications arrive here, one at a
    /// time, in the order the grid emitted them.
    pub fn events(&self) -> flume::Receiver<GridEvent> {
        self.events.clone()
    }

    /// Gets or creates the named partitioned map, typed to `V`.
    pub fn map<V>(&self, name: &str) -> GridMap<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.grid
            .state
            .maps
            .get_or_create(name, self.node_id(), self.grid.clone())
    }

    /// Gets or creates the named broadcast topic, typed to `M`.
    pub fn topic<M>(&self, name: &str) -> GridTopic<M>
    where
        M: Clone + Send + Sync + 'static,
    {
        self.grid
            .state
            .topics
            .get_or_create(name, self.node_id())
    }

    /// The partition a key routes to.
    pub fn partition_of(&self, key: &str) -> PartitionId {
        partition_of(key)
    }

    /// The node currently owning the given partition.
    pub fn partition_owner(&self, partition: PartitionId) -> Option<NodeId> {
        self.grid.partition_owner(partition)
    }

    /// Whether the grid currently has quorum.
    pub fn quorum_present(&self) -> bool {
        self.grid.quorum_present()
    }

    /// Initialises an extension on top of this node handle.
    pub async fn add_extension<E>(&self, extension: E) -> Result<E::Output, E::Error>
    where
        E: GridExtension,
    {
        extension.init_extension(self).await
    }

    /// Leaves the grid, handing partition ownership to the surviving members.
    pub fn leave(self) -> Result<(), GridError> {
        self.grid.remove_node(self.me.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: NodeId) -> GridMember {
        GridMember::new(id, test_helper::get_unused_addr())
    }

    #[test]
    fn test_join_assigns_all_partitions() {
        let grid = Grid::new(1);
        let node = grid.join(member(1)).expect("Join grid.");

        for partition in 0..PARTITION_COUNT {
            assert_eq!(node.partition_owner(partition), Some(1));
        }
    }

    #[test]
    fn test_rejoin_same_node_id_rejected() {
        let grid = Grid::new(1);
        let _node = grid.join(member(1)).expect("Join grid.");
        let result = grid.join(member(1));
        assert!(matches!(result, Err(GridError::AlreadyJoined(1))));
    }

    #[test]
    fn test_remove_unknown_node_rejected() {
        let grid = Grid::new(1);
        let err = grid.remove_node(42).expect_err("Unknown node must fail.");
        assert!(matches!(err, GridError::UnknownMember(42)));
    }

    #[test]
    fn test_quorum_transitions_emitted_once() {
        let grid = Grid::new(2);
        let node_1 = grid.join(member(1)).expect("Join grid.");
        assert!(!node_1.quorum_present());

        let node_2 = grid.join(member(2)).expect("Join grid.");
        assert!(node_1.quorum_present());

        let flips = node_1
            .events()
            .drain()
            .filter(|event| matches!(event, GridEvent::QuorumChanged { .. }))
            .count();
        assert_eq!(flips, 1, "Only the transition should be emitted.");

        node_2.leave().expect("Leave grid.");
        assert!(!node_1.quorum_present());
    }
}
