use std::sync::Arc;

use faultline_grid::GridMember;

use crate::error::FailoverError;
use crate::model::ClusterView;
use crate::storage::ClusterViewStore;

#[derive(Clone)]
/// Maintains the durable [`ClusterView`] topology record.
///
/// The view is an audit of membership, not an authority: partition ownership
/// decides who acts, the view only records who was there.
pub struct ClusterViewService {
    cluster_name: String,
    store: Arc<dyn ClusterViewStore>,
}

impl ClusterViewService {
    pub(crate) fn new(cluster_name: String, store: Arc<dyn ClusterViewStore>) -> Self {
        Self {
            cluster_name,
            store,
        }
    }

    /// Loads the persisted view, or a fresh one for this cluster name.
    pub async fn current(&self) -> Result<ClusterView, FailoverError> {
        let view = self
            .store
            .load()
            .await
            .map_err(FailoverError::Store)?
            .unwrap_or_else(|| ClusterView::new(self.cluster_name.clone()));
        Ok(view)
    }

    /// Persists a caller-updated view.
    pub async fn update(&self, view: &ClusterView) -> Result<(), FailoverError> {
        self.store.persist(view).await.map_err(FailoverError::Store)
    }

    /// Records a join: append the member address, electing it as the oldest
    /// member if none is recorded yet. Persists exactly once.
    pub(crate) async fn member_added(
        &self,
        member: &GridMember,
    ) -> Result<(), FailoverError> {
        let mut view = self.current().await?;
        view.members.insert(member.public_addr);
        if view.oldest.is_none() {
            view.oldest = Some(member.public_addr);
        }
        self.update(&view).await
    }

    /// Records a leave: drop the member address and, when the departed
    /// member was the recorded oldest, hand the reference to the oldest
    /// surviving member. Persists exactly once.
    pub(crate) async fn member_removed(
        &self,
        member: &GridMember,
        remaining: &[GridMember],
    ) -> Result<(), FailoverError> {
        let mut view = self.current().await?;
        view.members.remove(&member.public_addr);

        if view.oldest == Some(member.public_addr) {
            view.oldest = remaining.first().map(|survivor| survivor.public_addr);
            info!(
                departed = %member,
                new_oldest = ?view.oldest,
                "Oldest-member reference handed over.",
            );
        }

        self.update(&view).await
    }
}

#[cfg(test)]
mod tests {
    use faultline_grid::GridMember;

    use super::*;
    use crate::test_utils::MemViewStore;

    fn member(id: u64) -> GridMember {
        GridMember::new(id, test_helper::get_unused_addr())
    }

    #[tokio::test]
    async fn test_join_and_leave_update_view() {
        let store = Arc::new(MemViewStore::default());
        let service = ClusterViewService::new("chaos".to_string(), store.clone());

        let member_1 = member(1);
        let member_2 = member(2);
        service.member_added(&member_1).await.expect("Persist view.");
        service.member_added(&member_2).await.expect("Persist view.");

        let view = service.current().await.expect("Load view.");
        assert_eq!(view.cluster_name, "chaos");
        assert_eq!(view.members.len(), 2);
        assert_eq!(view.oldest, Some(member_1.public_addr));

        service
            .member_removed(&member_1, &[member_2.clone()])
            .await
            .expect("Persist view.");

        let view = service.current().await.expect("Load view.");
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.oldest, Some(member_2.public_addr));
        assert_eq!(store.persist_calls(), 3);
    }
}
