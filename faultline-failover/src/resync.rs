use std::collections::HashMap;
use std::sync::Arc;

use faultline_grid::{GridHandle, GridTopic, NodeId, TopicMessage};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::model::ResourceKind;
use crate::storage::ResyncHandler;

/// The broadcast topic carrying cache-invalidation messages.
pub(crate) const RESYNC_TOPIC: &str = "resync";

#[derive(Clone, Debug)]
/// A cache-invalidation broadcast.
pub struct ResyncMessage {
    pub kind: ResourceKind,
    pub ids: SmallVec<[String; 4]>,
}

/// Best-effort eventual consistency for caches which are not
/// partition-owned: credentials, cluster config, metric-provider config,
/// plugin install state, user records.
///
/// Every node, including the publisher, receives each broadcast; only
/// messages originating from a *different* member invoke the registered
/// handler, since the publisher mutated its own cache already.
pub struct ResyncBroadcaster {
    local_node: NodeId,
    topic: GridTopic<ResyncMessage>,
    handlers: RwLock<HashMap<ResourceKind, Arc<dyn ResyncHandler>>>,
}

impl ResyncBroadcaster {
    pub(crate) fn new(
        grid: &GridHandle,
    ) -> (Self, flume::Receiver<TopicMessage<ResyncMessage>>) {
        let topic = grid.topic::<ResyncMessage>(RESYNC_TOPIC);
        let messages = topic.subscribe();

        let broadcaster = Self {
            local_node: grid.node_id(),
            topic,
            handlers: RwLock::new(HashMap::new()),
        };
        (broadcaster, messages)
    }

    /// Registers the resync hook for the handler's resource kind, replacing
    /// any previous registration.
    pub fn register(&self, handler: Arc<dyn ResyncHandler>) {
        self.handlers.write().insert(handler.kind(), handler);
    }

    /// Broadcasts an invalidation for the given object ids to all nodes.
    pub fn publish(&self, kind: ResourceKind, ids: impl IntoIterator<Item = String>) {
        let message = ResyncMessage {
            kind,
            ids: ids.into_iter().collect(),
        };
        debug!(kind = ?kind, num_ids = message.ids.len(), "Publishing resync broadcast.");
        self.topic.publish(message);
    }

    pub async fn on_message(&self, message: TopicMessage<ResyncMessage>) {
        if message.publisher == self.local_node {
            trace!(
                kind = ?message.body.kind,
                "Ignoring self-originated resync broadcast.",
            );
            return;
        }

        let handler = self.handlers.read().get(&message.body.kind).cloned();
        match handler {
            Some(handler) => {
                if let Err(error) = handler.resync(&message.body.ids).await {
                    error!(
                        error = ?error,
                        kind = ?message.body.kind,
                        "Cache resync failed; state will realign on the next broadcast.",
                    );
                }
            },
            None => {
                warn!(
                    kind = ?message.body.kind,
                    "No resync handler registered for resource kind.",
                );
            },
        }
    }
}
