use crate::{GridMember, NodeId, PartitionId};

#[derive(Clone, Debug)]
/// A grid notification delivered to every node's event channel.
pub enum GridEvent {
    /// A new member joined the grid.
    MemberAdded { member: GridMember },
    /// A member left the grid, by choice or by crashing.
    MemberRemoved {
        member: GridMember,
        /// The members still alive after the removal.
        remaining: Vec<GridMember>,
    },
    /// Ownership of a partition is about to move.
    MigrationStarted {
        partition: PartitionId,
        /// `None` when the previous owner is no longer a grid member.
        old_owner: Option<NodeId>,
        new_owner: NodeId,
    },
    /// Ownership of a partition has moved.
    ///
    /// Always preceded by the matching [`GridEvent::MigrationStarted`],
    /// though not necessarily back-to-back.
    MigrationCompleted {
        partition: PartitionId,
        old_owner: Option<NodeId>,
        new_owner: NodeId,
    },
    /// Quorum presence flipped.
    QuorumChanged {
        present: bool,
        /// The members contributing to the evaluation.
        members: Vec<GridMember>,
    },
}
