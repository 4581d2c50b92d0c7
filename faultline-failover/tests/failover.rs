use std::sync::Arc;

use faultline_failover::test_utils::{
    task_record,
    MemScheduleStore,
    MemTaskStore,
    MemViewStore,
    RecordingResolver,
    RecordingRunner,
    RecordingResyncHandler,
};
use faultline_failover::{
    FailoverCoordinator,
    FailoverExtension,
    QuorumState,
    ResourceKind,
    ScheduleSpec,
    ScheduleStatus,
    TaskStatus,
    TriggerOutcome,
};
use faultline_grid::{partition_of, Grid, GridMember, NodeId};

/// A cluster sharing one durable backend, the way every node of a real
/// deployment shares one database.
struct TestCluster {
    grid: Grid,
    tasks: Arc<MemTaskStore>,
    schedules: Arc<MemScheduleStore>,
    views: Arc<MemViewStore>,
}

struct TestNode {
    coordinator: FailoverCoordinator,
    runner: Arc<RecordingRunner>,
    #[allow(dead_code)]
    resolver: Arc<RecordingResolver>,
}

impl TestCluster {
    fn new(minimum_quorum: usize) -> Self {
        Self {
            grid: Grid::new(minimum_quorum),
            tasks: Arc::new(MemTaskStore::default()),
            schedules: Arc::new(MemScheduleStore::default()),
            views: Arc::new(MemViewStore::default()),
        }
    }

    async fn spawn(&self, node_id: NodeId) -> anyhow::Result<TestNode> {
        let handle = self
            .grid
            .join(GridMember::new(node_id, test_helper::get_unused_addr()))?;

        let runner = Arc::new(RecordingRunner::default());
        let resolver = Arc::new(RecordingResolver::default());
        let extension = FailoverExtension::new(
            self.tasks.clone(),
            self.schedules.clone(),
            resolver.clone(),
            runner.clone(),
            self.views.clone(),
        )
        .with_cluster_name("chaos-tests");

        let coordinator = handle.add_extension(extension).await?;
        Ok(TestNode {
            coordinator,
            runner,
            resolver,
        })
    }
}

impl TestNode {
    fn node_id(&self) -> NodeId {
        self.coordinator.handle().node_id()
    }

    fn times_submitted(&self, task_id: &str) -> usize {
        self.runner
            .submitted()
            .iter()
            .filter(|submitted| submitted.as_str() == task_id)
            .count()
    }
}

async fn flush_all(nodes: &[TestNode]) {
    for node in nodes {
        node.coordinator.flush().await;
    }
}

#[tokio::test]
async fn test_dead_node_task_resumed_exactly_once() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(2);
    let mut nodes = vec![
        cluster.spawn(1).await?,
        cluster.spawn(2).await?,
        cluster.spawn(3).await?,
    ];
    flush_all(&nodes).await;

    // Registering the task starts it on the partition owner and nowhere
    // else.
    cluster
        .tasks
        .insert(task_record("t1", TaskStatus::InProgress, false));
    nodes[0]
        .coordinator
        .registry()
        .add("t1", TaskStatus::InProgress);
    flush_all(&nodes).await;

    let owner_position = nodes
        .iter()
        .position(|node| node.times_submitted("t1") == 1)
        .expect("Exactly one node must have started the task.");
    let total: usize = nodes.iter().map(|node| node.times_submitted("t1")).sum();
    assert_eq!(total, 1);

    // Kill the owner. Both the member-removed scan and the partition
    // migration race to resume the task; the assignment tracker must keep
    // the number of new executors at one.
    let owner = nodes.remove(owner_position);
    cluster.grid.remove_node(owner.node_id())?;
    flush_all(&nodes).await;

    let resumed: usize = nodes.iter().map(|node| node.times_submitted("t1")).sum();
    assert_eq!(resumed, 1, "The task must be resumed on exactly one survivor.");

    let new_owner = cluster
        .grid
        .partition_owner(partition_of("t1"))
        .expect("Partition must be owned.");
    assert!(nodes[0]
        .coordinator
        .assignments()
        .is_assigned(new_owner, "t1"));

    Ok(())
}

#[tokio::test]
async fn test_late_joiner_observes_established_quorum() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(2);
    let node_1 = cluster.spawn(1).await?;
    let node_2 = cluster.spawn(2).await?;
    // Quorum already held before this node joined, so it never receives a
    // quorum-change event.
    let node_3 = cluster.spawn(3).await?;
    let nodes = [node_1, node_2, node_3];
    flush_all(&nodes).await;

    for node in &nodes {
        assert_eq!(node.coordinator.quorum_state(), QuorumState::Present);
    }

    // Work whose partition lands on the late joiner still starts.
    cluster
        .tasks
        .insert(task_record("t1", TaskStatus::InProgress, false));
    nodes[0]
        .coordinator
        .registry()
        .add("t1", TaskStatus::InProgress);
    flush_all(&nodes).await;

    let total: usize = nodes.iter().map(|node| node.times_submitted("t1")).sum();
    assert_eq!(total, 1);

    Ok(())
}

#[tokio::test]
async fn test_joining_node_never_inherits_running_work() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node_1 = cluster.spawn(1).await?;
    node_1.coordinator.flush().await;

    cluster
        .tasks
        .insert(task_record("t1", TaskStatus::InProgress, false));
    node_1
        .coordinator
        .registry()
        .add("t1", TaskStatus::InProgress);
    node_1.coordinator.flush().await;
    assert_eq!(node_1.times_submitted("t1"), 1);

    // Scale-up hands partitions to the joiner while the executor stays on
    // the original node; the joiner must not start a second one.
    let node_2 = cluster.spawn(2).await?;
    node_1.coordinator.flush().await;
    node_2.coordinator.flush().await;

    assert!(node_2.runner.submitted().is_empty());
    assert_eq!(node_1.times_submitted("t1"), 1);

    Ok(())
}

#[tokio::test]
async fn test_quorum_gates_triggering_and_recovery_rearms() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(2);
    let node_1 = cluster.spawn(1).await?;
    cluster
        .tasks
        .insert(task_record("t-orphan", TaskStatus::InProgress, false));
    node_1.coordinator.flush().await;

    assert_eq!(node_1.coordinator.quorum_state(), QuorumState::NotPresent);
    assert!(node_1.runner.submitted().is_empty());

    // The second member establishes quorum; the oldest member re-arms the
    // persisted in-progress task and the partition owner picks it up.
    let node_2 = cluster.spawn(2).await?;
    node_1.coordinator.flush().await;
    node_2.coordinator.flush().await;

    assert_eq!(node_1.coordinator.quorum_state(), QuorumState::Present);
    assert_eq!(node_2.coordinator.quorum_state(), QuorumState::Present);
    let total = node_1.times_submitted("t-orphan") + node_2.times_submitted("t-orphan");
    assert_eq!(total, 1);

    // Losing quorum suspends local scheduling on the survivor; the orphaned
    // task stays parked until quorum returns.
    let submitted_before = node_1.times_submitted("t-orphan");
    cluster.grid.remove_node(2)?;
    node_1.coordinator.flush().await;

    assert_eq!(node_1.coordinator.quorum_state(), QuorumState::NotPresent);
    assert_eq!(node_1.runner.cancel_all_calls(), 1);
    assert_eq!(node_1.times_submitted("t-orphan"), submitted_before);

    Ok(())
}

#[tokio::test]
async fn test_terminal_task_removed_instead_of_started() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node = cluster.spawn(1).await?;
    node.coordinator.flush().await;

    cluster
        .tasks
        .insert(task_record("t-done", TaskStatus::Completed, false));
    node.coordinator
        .registry()
        .add("t-done", TaskStatus::InProgress);
    node.coordinator.flush().await;

    assert!(!node.coordinator.registry().contains("t-done"));
    assert!(node.runner.submitted().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_trigger_honours_schedule_status() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node = cluster.spawn(1).await?;
    node.coordinator.flush().await;

    cluster
        .tasks
        .insert(task_record("t-cron", TaskStatus::Scheduled, true));
    cluster.schedules.insert(ScheduleSpec {
        id: "t-cron".to_string(),
        status: ScheduleStatus::Paused,
        cron_expression: Some("0 0 * * * *".to_string()),
        scheduled_at: None,
    });
    node.coordinator
        .registry()
        .add("t-cron", TaskStatus::Scheduled);

    // Paused schedule: nothing to execute, stale tracking removed.
    let outcome = node.coordinator.trigger("t-cron").await?;
    assert_eq!(outcome, TriggerOutcome::Skipped);
    assert!(!node.coordinator.registry().contains("t-cron"));
    assert!(node.runner.submitted().is_empty());

    // Re-activated schedule: the same trigger path submits it.
    cluster.schedules.insert(ScheduleSpec {
        id: "t-cron".to_string(),
        status: ScheduleStatus::Scheduled,
        cron_expression: Some("0 0 * * * *".to_string()),
        scheduled_at: None,
    });
    let outcome = node.coordinator.trigger("t-cron").await?;
    assert_eq!(outcome, TriggerOutcome::Submitted);
    assert_eq!(node.runner.submitted(), vec!["t-cron".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_resync_reaches_every_other_node() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node_1 = cluster.spawn(1).await?;
    let node_2 = cluster.spawn(2).await?;
    let node_3 = cluster.spawn(3).await?;

    let handler_1 = Arc::new(RecordingResyncHandler::new(ResourceKind::Credentials));
    let handler_2 = Arc::new(RecordingResyncHandler::new(ResourceKind::Credentials));
    let handler_3 = Arc::new(RecordingResyncHandler::new(ResourceKind::Credentials));
    node_1.coordinator.register_resync_handler(handler_1.clone());
    node_2.coordinator.register_resync_handler(handler_2.clone());
    node_3.coordinator.register_resync_handler(handler_3.clone());

    node_1
        .coordinator
        .publish_resync(ResourceKind::Credentials, ["c1".to_string()]);
    node_1.coordinator.flush().await;
    node_2.coordinator.flush().await;
    node_3.coordinator.flush().await;

    // The publisher already mutated its own cache, so only the other two
    // members resync.
    assert!(handler_1.calls().is_empty());
    assert_eq!(handler_2.calls(), vec![vec!["c1".to_string()]]);
    assert_eq!(handler_3.calls(), vec![vec!["c1".to_string()]]);

    Ok(())
}

#[tokio::test]
async fn test_cluster_view_follows_topology() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node_1 = cluster.spawn(1).await?;
    let node_2 = cluster.spawn(2).await?;
    node_1.coordinator.flush().await;
    node_2.coordinator.flush().await;

    let oldest_addr = node_1.coordinator.handle().me().public_addr;
    let survivor_addr = node_2.coordinator.handle().me().public_addr;

    let view = node_2.coordinator.cluster_view().await?;
    assert_eq!(view.cluster_name, "chaos-tests");
    assert_eq!(view.members.len(), 2);
    assert_eq!(view.oldest, Some(oldest_addr));

    // The oldest member dying hands the reference to a survivor.
    cluster.grid.remove_node(1)?;
    node_2.coordinator.flush().await;

    let view = node_2.coordinator.cluster_view().await?;
    assert_eq!(view.members.len(), 1);
    assert_eq!(view.oldest, Some(survivor_addr));

    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_reacting_to_topology() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let cluster = TestCluster::new(1);
    let node_1 = cluster.spawn(1).await?;
    let node_2 = cluster.spawn(2).await?;
    node_1.coordinator.flush().await;
    node_2.coordinator.flush().await;

    cluster
        .tasks
        .insert(task_record("t1", TaskStatus::InProgress, false));
    node_2
        .coordinator
        .assignments()
        .record(node_2.node_id(), "t1");

    node_1.coordinator.shutdown();
    node_1.coordinator.flush().await;
    cluster.grid.remove_node(2)?;

    // Direct calls still work after shutdown, but the dead member's task is
    // no longer picked up automatically.
    assert!(node_1.runner.submitted().is_empty());
    assert_eq!(
        node_1.coordinator.trigger("t1").await?,
        TriggerOutcome::Submitted
    );

    Ok(())
}
