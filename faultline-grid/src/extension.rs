use async_trait::async_trait;

use crate::GridHandle;

#[async_trait]
/// An extension of the base grid node.
///
/// This can be used to layer additional functionality on top of a node
/// handle, like the failover coordinator or anything else which wants to
/// consume the membership, map and topic systems.
pub trait GridExtension {
    type Output;
    type Error;

    async fn init_extension(self, grid: &GridHandle)
        -> Result<Self::Output, Self::Error>;
}
