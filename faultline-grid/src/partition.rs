use crate::NodeId;

/// A fixed shard of the grid key space with exactly one owner at a time.
pub type PartitionId = u32;

/// The number of partitions the key space is divided into.
pub const PARTITION_COUNT: u32 = 271;

/// The partition a key routes to.
///
/// Routing is stable for the lifetime of the grid: the partition of a key
/// never changes, only the owner of the partition does.
pub fn partition_of(key: &str) -> PartitionId {
    crc32fast::hash(key.as_bytes()) % PARTITION_COUNT
}

/// A single partition ownership handoff produced by a rebalance.
pub(crate) struct Migration {
    pub partition: PartitionId,
    pub old_owner: Option<NodeId>,
    pub new_owner: NodeId,
}

/// The live partition-to-owner table.
pub(crate) struct PartitionTable {
    owners: Vec<Option<NodeId>>,
}

impl Default for PartitionTable {
    fn default() -> Self {
        Self {
            owners: vec![None; PARTITION_COUNT as usize],
        }
    }
}

impl PartitionTable {
    pub(crate) fn owner(&self, partition: PartitionId) -> Option<NodeId> {
        self.owners.get(partition as usize).copied().flatten()
    }

    /// Reassigns partitions across the given member set, returning the set
    /// of ownership moves.
    ///
    /// Assignment is deterministic: partition `p` belongs to member
    /// `p % members.len()` of the id-ordered member list. An owner which is
    /// no longer a member is reported as `old_owner: None`, matching the
    /// behaviour of grids whose previous owner died rather than handed off.
    pub(crate) fn rebalance(&mut self, members: &[NodeId]) -> Vec<Migration> {
        let mut moves = Vec::new();

        if members.is_empty() {
            self.owners = vec![None; PARTITION_COUNT as usize];
            return moves;
        }

        for partition in 0..PARTITION_COUNT {
            let new_owner = members[partition as usize % members.len()];
            let old_owner = self.owners[partition as usize];

            if old_owner != Some(new_owner) {
                self.owners[partition as usize] = Some(new_owner);
                moves.push(Migration {
                    partition,
                    old_owner: old_owner.filter(|owner| members.contains(owner)),
                    new_owner,
                });
            }
        }

        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_routing_is_stable() {
        let partition = partition_of("task-1");
        assert_eq!(partition, partition_of("task-1"));
        assert!(partition < PARTITION_COUNT);
    }

    #[test]
    fn test_rebalance_covers_every_partition() {
        let mut table = PartitionTable::default();
        table.rebalance(&[1, 2, 3]);

        for partition in 0..PARTITION_COUNT {
            assert!(table.owner(partition).is_some());
        }
    }

    #[test]
    fn test_dead_owner_reported_as_none() {
        let mut table = PartitionTable::default();
        table.rebalance(&[1, 2]);
        let moves = table.rebalance(&[1]);

        assert!(!moves.is_empty());
        for migration in moves {
            assert_eq!(migration.old_owner, None);
            assert_eq!(migration.new_owner, 1);
        }
    }

    #[test]
    fn test_live_handoff_reports_old_owner() {
        let mut table = PartitionTable::default();
        table.rebalance(&[1]);
        let moves = table.rebalance(&[1, 2]);

        assert!(!moves.is_empty());
        for migration in moves {
            assert_eq!(migration.old_owner, Some(1));
            assert_eq!(migration.new_owner, 2);
        }
    }
}
