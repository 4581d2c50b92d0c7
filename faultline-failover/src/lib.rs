//! # Faultline Failover
//! Distributed task-ownership and failover coordination for a
//! chaos-engineering control plane.
//!
//! Every node runs one [`FailoverCoordinator`], attached to a grid node
//! handle via [`FailoverExtension`]. The coordinator tracks which node runs
//! which fault-injection task, and when topology changes under the cluster
//! it re-triggers orphaned work on exactly one surviving node:
//!
//! - a dead member's tasks are resumed by the node owning each task's
//!   partition ([`MembershipHandler`] semantics),
//! - migrated partitions are adopted by their new owner
//!   ([`MigrationHandler`] semantics),
//! - nothing is triggered at all while quorum is absent ([`QuorumGate`]),
//! - caches with no partition authority realign through broadcast
//!   ([`ResyncBroadcaster`]).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use faultline_failover::test_utils::{
//!     MemScheduleStore,
//!     MemTaskStore,
//!     MemViewStore,
//!     RecordingResolver,
//!     RecordingRunner,
//! };
//! use faultline_failover::FailoverExtension;
//! use faultline_grid::{Grid, GridMember};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let grid = Grid::new(2);
//!     let node = grid.join(GridMember::new(1, "127.0.0.1:8000".parse()?))?;
//!
//!     let extension = FailoverExtension::new(
//!         Arc::new(MemTaskStore::default()),
//!         Arc::new(MemScheduleStore::default()),
//!         Arc::new(RecordingResolver::default()),
//!         Arc::new(RecordingRunner::default()),
//!         Arc::new(MemViewStore::default()),
//!     )
//!     .with_cluster_name("chaos");
//!
//!     let coordinator = node.add_extension(extension).await?;
//!     coordinator.trigger("my-task-id").await?;
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate tracing;

mod assignment;
mod bootstrap;
mod cluster;
mod error;
mod listener;
mod membership;
mod migration;
mod model;
mod quorum;
mod registry;
mod resync;
mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod trigger;

use std::sync::Arc;

pub use assignment::NodeAssignments;
use async_trait::async_trait;
pub use bootstrap::Bootstrapper;
pub use cluster::ClusterViewService;
pub use error::FailoverError;
use faultline_grid::{GridEvent, GridExtension, GridHandle, MapEvent, TopicMessage};
pub use listener::RegistryListener;
pub use membership::MembershipHandler;
pub use migration::MigrationHandler;
pub use model::{
    ClusterView,
    ExecutionPlan,
    ResourceKind,
    ScheduleSpec,
    ScheduleStatus,
    TaskId,
    TaskRecord,
    TaskStatus,
    TaskType,
};
pub use quorum::{QuorumGate, QuorumHandler, QuorumState};
pub use registry::TaskRegistry;
pub use resync::{ResyncBroadcaster, ResyncMessage};
pub use storage::{
    ClusterViewStore,
    ExecutionResolver,
    ResyncHandler,
    ScheduleStore,
    TaskRunner,
    TaskStore,
};
use tokio::sync::oneshot;
pub use trigger::{TaskTriggerService, TriggerOutcome};

use crate::registry::TASKS_MAP;

pub(crate) const DEFAULT_CLUSTER_NAME: &str = "faultline";

/// Attaches failover coordination to a grid node.
///
/// The stores and the runner are the seams into the surrounding
/// application: durable task/schedule persistence, the execution engine and
/// the cluster-view audit record.
pub struct FailoverExtension {
    cluster_name: String,
    tasks: Arc<dyn TaskStore>,
    schedules: Arc<dyn ScheduleStore>,
    resolver: Arc<dyn ExecutionResolver>,
    runner: Arc<dyn TaskRunner>,
    views: Arc<dyn ClusterViewStore>,
}

impl FailoverExtension {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        schedules: Arc<dyn ScheduleStore>,
        resolver: Arc<dyn ExecutionResolver>,
        runner: Arc<dyn TaskRunner>,
        views: Arc<dyn ClusterViewStore>,
    ) -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            tasks,
            schedules,
            resolver,
            runner,
            views,
        }
    }

    /// Sets the cluster name recorded in the durable cluster view.
    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }
}

#[async_trait]
impl GridExtension for FailoverExtension {
    type Output = FailoverCoordinator;
    type Error = FailoverError;

    async fn init_extension(self, grid: &GridHandle) -> Result<Self::Output, Self::Error> {
        FailoverCoordinator::create(grid.clone(), self).await
    }
}

enum PumpOp {
    /// Process everything currently queued, then acknowledge.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Clone)]
/// The per-node failover coordinator.
///
/// Owns the background event pump reacting to topology and registry events;
/// the methods here are the application-facing surface. Cheap to clone.
pub struct FailoverCoordinator {
    grid: GridHandle,
    registry: TaskRegistry,
    assignments: NodeAssignments,
    gate: QuorumGate,
    trigger: Arc<TaskTriggerService>,
    resync: Arc<ResyncBroadcaster>,
    view: ClusterViewService,
    ops: flume::Sender<PumpOp>,
}

impl FailoverCoordinator {
    pub(crate) async fn create(
        grid: GridHandle,
        extension: FailoverExtension,
    ) -> Result<Self, FailoverError> {
        let registry = TaskRegistry::new(grid.map(TASKS_MAP));
        let map_events = registry.ensure_listener();
        let assignments = NodeAssignments::new(grid.map(assignment::NODE_TASKS_MAP));

        // Quorum-change events only fire on transitions; a node joining an
        // already-quorate cluster would otherwise never see one.
        let gate = QuorumGate::new();
        gate.set(grid.quorum_present());
        let view = ClusterViewService::new(extension.cluster_name, extension.views);

        let trigger = Arc::new(TaskTriggerService::new(
            grid.clone(),
            registry.clone(),
            assignments.clone(),
            extension.tasks.clone(),
            extension.schedules.clone(),
            extension.resolver,
            extension.runner.clone(),
        ));

        let (resync, topic_messages) = ResyncBroadcaster::new(&grid);
        let resync = Arc::new(resync);

        let bootstrap = Bootstrapper::new(
            grid.clone(),
            registry.clone(),
            extension.tasks.clone(),
            extension.schedules,
            extension.runner,
            gate.clone(),
        );

        let handlers = EventHandlers {
            membership: MembershipHandler::new(
                grid.clone(),
                assignments.clone(),
                trigger.clone(),
                gate.clone(),
                view.clone(),
            ),
            migration: MigrationHandler::new(
                grid.clone(),
                registry.clone(),
                assignments.clone(),
                trigger.clone(),
                gate.clone(),
            ),
            listener: RegistryListener::new(
                grid.clone(),
                registry.clone(),
                assignments.clone(),
                extension.tasks,
                trigger.clone(),
                gate.clone(),
            ),
            quorum: QuorumHandler::new(gate.clone(), bootstrap),
            resync: resync.clone(),
        };

        let (ops_tx, ops_rx) = flume::unbounded();
        tokio::spawn(run_event_pump(
            handlers,
            grid.events(),
            map_events,
            topic_messages,
            ops_rx,
        ));

        info!(
            node_id = grid.node_id(),
            "Failover coordinator attached to grid node.",
        );

        Ok(Self {
            grid,
            registry,
            assignments,
            gate,
            trigger,
            resync,
            view,
            ops: ops_tx,
        })
    }

    /// The grid node this coordinator is attached to.
    pub fn handle(&self) -> &GridHandle {
        &self.grid
    }

    /// The distributed task registry.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The node-task assignment tracker.
    pub fn assignments(&self) -> &NodeAssignments {
        &self.assignments
    }

    /// Whether the cluster currently has quorum.
    pub fn quorum_state(&self) -> QuorumState {
        self.gate.state()
    }

    /// Resumes or starts the given task on the local node.
    ///
    /// See [`TaskTriggerService::trigger`].
    pub async fn trigger(&self, task_id: &str) -> Result<TriggerOutcome, FailoverError> {
        self.trigger.trigger(task_id).await
    }

    /// Cancels the locally armed schedule for a task ahead of an ownership
    /// handoff.
    pub async fn clean_up_for_migration(
        &self,
        task_id: &str,
    ) -> Result<(), FailoverError> {
        self.trigger.clean_up_for_migration(task_id).await
    }

    /// Evicts a task from the local node's assignment set.
    pub fn remove_from_node_cache(&self, task_id: &str) {
        self.trigger.remove_from_node_cache(task_id);
    }

    /// Registers the resync hook for the handler's resource kind.
    pub fn register_resync_handler(&self, handler: Arc<dyn ResyncHandler>) {
        self.resync.register(handler);
    }

    /// Broadcasts a cache-invalidation message for the given object ids.
    pub fn publish_resync(
        &self,
        kind: ResourceKind,
        ids: impl IntoIterator<Item = String>,
    ) {
        self.resync.publish(kind, ids);
    }

    /// Loads the durable cluster-view topology record.
    pub async fn cluster_view(&self) -> Result<ClusterView, FailoverError> {
        self.view.current().await
    }

    /// Persists a caller-updated cluster view.
    pub async fn update_cluster_view(
        &self,
        view: &ClusterView,
    ) -> Result<(), FailoverError> {
        self.view.update(view).await
    }

    /// Waits until every event queued so far has been processed.
    ///
    /// Events produced while processing, e.g. registry entries added during
    /// quorum recovery, are processed as well before this returns.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.ops.send(PumpOp::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Stops the background event pump.
    ///
    /// The coordinator's direct methods keep working; topology events are no
    /// longer reacted to.
    pub fn shutdown(&self) {
        let _ = self.ops.send(PumpOp::Shutdown);
    }
}

struct EventHandlers {
    membership: MembershipHandler,
    migration: MigrationHandler,
    listener: RegistryListener,
    quorum: QuorumHandler,
    resync: Arc<ResyncBroadcaster>,
}

impl EventHandlers {
    async fn dispatch_grid(&self, event: GridEvent) {
        match event {
            GridEvent::MemberAdded { member } => {
                self.membership.on_member_added(&member).await;
            },
            GridEvent::MemberRemoved { member, remaining } => {
                self.membership.on_member_removed(&member, &remaining).await;
            },
            GridEvent::MigrationStarted {
                partition,
                old_owner,
                new_owner,
            } => {
                self.migration
                    .on_migration_started(partition, old_owner, new_owner)
                    .await;
            },
            GridEvent::MigrationCompleted {
                partition,
                old_owner,
                new_owner,
            } => {
                self.migration
                    .on_migration_completed(partition, old_owner, new_owner)
                    .await;
            },
            GridEvent::QuorumChanged { present, members } => {
                self.quorum.on_quorum_change(present, &members).await;
            },
        }
    }
}

/// The per-node event pump.
///
/// One event is processed at a time across all three sources, which is the
/// serialization guarantee the handlers' idempotency checks rely on.
async fn run_event_pump(
    handlers: EventHandlers,
    grid_events: flume::Receiver<GridEvent>,
    map_events: flume::Receiver<MapEvent<TaskStatus>>,
    topic_messages: flume::Receiver<TopicMessage<ResyncMessage>>,
    ops: flume::Receiver<PumpOp>,
) {
    loop {
        tokio::select! {
            op = ops.recv_async() => match op {
                Ok(PumpOp::Flush(ack)) => {
                    drain(&handlers, &grid_events, &map_events, &topic_messages).await;
                    let _ = ack.send(());
                },
                Ok(PumpOp::Shutdown) | Err(_) => break,
            },
            event = grid_events.recv_async() => match event {
                Ok(event) => handlers.dispatch_grid(event).await,
                Err(_) => break,
            },
            event = map_events.recv_async() => match event {
                Ok(event) => handlers.listener.on_map_event(event).await,
                Err(_) => break,
            },
            message = topic_messages.recv_async() => match message {
                Ok(message) => handlers.resync.on_message(message).await,
                Err(_) => break,
            },
        }
    }

    // Flush callers racing the shutdown still get their acknowledgement;
    // callers arriving after the ops receiver drops observe a closed channel.
    for op in ops.try_iter() {
        if let PumpOp::Flush(ack) = op {
            let _ = ack.send(());
        }
    }

    debug!("Failover event pump stopped.");
}

/// Processes queued events until all three sources are empty at once.
async fn drain(
    handlers: &EventHandlers,
    grid_events: &flume::Receiver<GridEvent>,
    map_events: &flume::Receiver<MapEvent<TaskStatus>>,
    topic_messages: &flume::Receiver<TopicMessage<ResyncMessage>>,
) {
    loop {
        if let Ok(event) = grid_events.try_recv() {
            handlers.dispatch_grid(event).await;
            continue;
        }
        if let Ok(event) = map_events.try_recv() {
            handlers.listener.on_map_event(event).await;
            continue;
        }
        if let Ok(message) = topic_messages.try_recv() {
            handlers.resync.on_message(message).await;
            continue;
        }
        break;
    }
}
