use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("node {0} has already joined the grid")]
    /// A member with the same node id is already part of the grid.
    AlreadyJoined(NodeId),

    #[error("node {0} is not a member of the grid")]
    /// The targeted node is not currently a grid member.
    UnknownMember(NodeId),
}
