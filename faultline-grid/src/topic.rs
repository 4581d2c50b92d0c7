use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::NodeId;

#[derive(Clone, Debug)]
/// A message received from a broadcast topic.
pub struct TopicMessage<M> {
    /// The node which published the message.
    ///
    /// The publisher receives its own messages back; subscribers use this
    /// field to decide whether to suppress self-originated work.
    pub publisher: NodeId,
    pub body: M,
}

/// A named broadcast topic.
///
/// Publishing fans the message out to every subscriber, including the
/// publishing node itself. Cheap to clone.
#[derive(Clone)]
pub struct GridTopic<M> {
    name: String,
    node_id: NodeId,
    state: TopicState<M>,
}

impl<M> GridTopic<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Publishes a message to every subscriber.
    pub fn publish(&self, body: M) {
        let message = TopicMessage {
            publisher: self.node_id,
            body,
        };

        let subscribers = self.state.shared.subscribers.read();
        for (node_id, tx) in subscribers.iter() {
            if tx.send(message.clone()).is_err() {
                trace!(
                    topic = %self.name,
                    node_id,
                    "Subscriber channel closed, dropping topic message.",
                );
            }
        }
    }

    /// Subscribes the local node, replacing any previous subscription.
    pub fn subscribe(&self) -> flume::Receiver<TopicMessage<M>> {
        let (tx, rx) = flume::unbounded();
        self.state
            .shared
            .subscribers
            .write()
            .insert(self.node_id, tx);
        rx
    }
}

struct TopicShared<M> {
    subscribers: RwLock<BTreeMap<NodeId, flume::Sender<TopicMessage<M>>>>,
}

struct TopicState<M> {
    shared: Arc<TopicShared<M>>,
}

impl<M> Clone for TopicState<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M> Default for TopicState<M> {
    fn default() -> Self {
        Self {
            shared: Arc::new(TopicShared {
                subscribers: RwLock::new(BTreeMap::new()),
            }),
        }
    }
}

trait ErasedTopic: Send + Sync {
    fn drop_subscriber(&self, node_id: NodeId);
    fn as_any(&self) -> &dyn Any;
}

impl<M> ErasedTopic for TopicState<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn drop_subscriber(&self, node_id: NodeId) {
        self.shared.subscribers.write().remove(&node_id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub(crate) struct TopicRegistry {
    topics: Mutex<HashMap<String, Box<dyn ErasedTopic>>>,
}

impl TopicRegistry {
    pub(crate) fn get_or_create<M>(&self, name: &str, node_id: NodeId) -> GridTopic<M>
    where
        M: Clone + Send + Sync + 'static,
    {
        let mut topics = self.topics.lock();
        let entry = topics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(TopicState::<M>::default()));

        let state = entry
            .as_any()
            .downcast_ref::<TopicState<M>>()
            .expect("topic accessed with mismatched message type")
            .clone();

        GridTopic {
            name: name.to_string(),
            node_id,
            state,
        }
    }

    pub(crate) fn drop_node_subscribers(&self, node_id: NodeId) {
        let topics = self.topics.lock();
        for state in topics.values() {
            state.drop_subscriber(node_id);
        }
    }
}
