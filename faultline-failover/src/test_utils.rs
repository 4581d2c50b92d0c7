//! In-memory collaborators for exercising the coordinator without a real
//! persistence layer or execution engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use faultline_grid::{Grid, GridHandle, GridMember};
use parking_lot::RwLock;

use crate::assignment::{NodeAssignments, NODE_TASKS_MAP};
use crate::bootstrap::Bootstrapper;
use crate::cluster::ClusterViewService;
use crate::listener::RegistryListener;
use crate::membership::MembershipHandler;
use crate::migration::MigrationHandler;
use crate::model::{
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
use crate::quorum::QuorumGate;
use crate::registry::{TaskRegistry, TASKS_MAP};
use crate::storage::{
    ClusterViewStore,
    ExecutionResolver,
    ResyncHandler,
    ScheduleStore,
    TaskRunner,
    TaskStore,
};
use crate::trigger::TaskTriggerService;

/// Builds a task record with the coordination-relevant fields set.
pub fn task_record(id: &str, status: TaskStatus, scheduled: bool) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        name: format!("fault-{id}"),
        task_type: TaskType::Injection,
        status,
        extension_name: "cpu-burn".to_string(),
        scheduled,
        payload: Vec::new(),
    }
}

#[derive(Default)]
pub struct MemTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemTaskStore {
    pub fn insert(&self, record: TaskRecord) {
        self.tasks.write().insert(record.id.clone(), record);
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Some(record) = self.tasks.write().get_mut(task_id) {
            record.status = status;
        }
    }
}

#[async_trait]
impl TaskStore for MemTaskStore {
    async fn get_task(&self, task_id: &str) -> anyhow::Result<Option<TaskRecord>> {
        Ok(self.tasks.read().get(task_id).cloned())
    }

    async fn in_progress_tasks(&self) -> anyhow::Result<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|record| record.status == TaskStatus::InProgress)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemScheduleStore {
    schedules: RwLock<HashMap<TaskId, ScheduleSpec>>,
}

impl MemScheduleStore {
    pub fn insert(&self, spec: ScheduleSpec) {
        self.schedules.write().insert(spec.id.clone(), spec);
    }
}

#[async_trait]
impl ScheduleStore for MemScheduleStore {
    async fn get_schedule(
        &self,
        task_id: &str,
    ) -> anyhow::Result<Option<ScheduleSpec>> {
        Ok(self.schedules.read().get(task_id).cloned())
    }

    async fn active_schedules(&self) -> anyhow::Result<Vec<ScheduleSpec>> {
        Ok(self
            .schedules
            .read()
            .values()
            .filter(|spec| spec.status.is_active())
            .cloned()
            .collect())
    }
}

/// Resolver double which counts calls and can fail for chosen task ids.
#[derive(Default)]
pub struct RecordingResolver {
    calls: AtomicUsize,
    fail_for: RwLock<HashSet<TaskId>>,
}

impl RecordingResolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes resolution fail for the given task, simulating a missing
    /// execution strategy.
    pub fn fail_for(&self, task_id: &str) {
        self.fail_for.write().insert(task_id.to_string());
    }
}

#[async_trait]
impl ExecutionResolver for RecordingResolver {
    async fn resolve(&self, record: &TaskRecord) -> anyhow::Result<ExecutionPlan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.read().contains(&record.id) {
            anyhow::bail!(
                "no execution strategy registered for extension '{}'",
                record.extension_name
            );
        }

        Ok(ExecutionPlan {
            task: record.clone(),
            endpoint_name: format!("endpoint-{}", record.id),
            credential_name: None,
        })
    }
}

/// Runner double which records submissions and schedule cancellations.
#[derive(Default)]
pub struct RecordingRunner {
    submitted: RwLock<Vec<TaskId>>,
    cancelled: RwLock<Vec<TaskId>>,
    cancel_all_calls: AtomicUsize,
}

impl RecordingRunner {
    pub fn submitted(&self) -> Vec<TaskId> {
        self.submitted.read().clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.read().clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    async fn submit(&self, plan: ExecutionPlan) -> anyhow::Result<()> {
        self.submitted.write().push(plan.task.id);
        Ok(())
    }

    async fn cancel_local_schedule(&self, task_id: &str) -> anyhow::Result<()> {
        self.cancelled.write().push(task_id.to_string());
        Ok(())
    }

    async fn cancel_all_local_schedules(&self) -> anyhow::Result<()> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemViewStore {
    view: RwLock<Option<ClusterView>>,
    persist_calls: AtomicUsize,
}

impl MemViewStore {
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterViewStore for MemViewStore {
    async fn load(&self) -> anyhow::Result<Option<ClusterView>> {
        Ok(self.view.read().clone())
    }

    async fn persist(&self, view: &ClusterView) -> anyhow::Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        *self.view.write() = Some(view.clone());
        Ok(())
    }
}

pub struct RecordingResyncHandler {
    kind: ResourceKind,
    calls: RwLock<Vec<Vec<String>>>,
}

impl RecordingResyncHandler {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.read().clone()
    }
}

#[async_trait]
impl ResyncHandler for RecordingResyncHandler {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn resync(&self, ids: &[String]) -> anyhow::Result<()> {
        self.calls.write().push(ids.to_vec());
        Ok(())
    }
}

/// One node's worth of fully wired handlers over in-memory collaborators.
///
/// Handler methods are invoked directly by unit tests; the integration
/// tests drive the same components through the coordinator's event pump.
pub struct TestBench {
    pub grid: GridHandle,
    pub registry: TaskRegistry,
    pub assignments: NodeAssignments,
    pub gate: QuorumGate,
    pub trigger: Arc<TaskTriggerService>,
    pub membership: MembershipHandler,
    pub migration: MigrationHandler,
    pub listener: RegistryListener,
    pub bootstrap: Bootstrapper,
    pub tasks: Arc<MemTaskStore>,
    pub schedules: Arc<MemScheduleStore>,
    pub resolver: Arc<RecordingResolver>,
    pub runner: Arc<RecordingRunner>,
    pub views: Arc<MemViewStore>,
}

impl TestBench {
    pub async fn join(grid: &Grid, member: GridMember) -> Self {
        let handle = grid.join(member).expect("Join grid.");
        Self::on(handle)
    }

    pub fn on(handle: GridHandle) -> Self {
        let tasks = Arc::new(MemTaskStore::default());
        let schedules = Arc::new(MemScheduleStore::default());
        let resolver = Arc::new(RecordingResolver::default());
        let runner = Arc::new(RecordingRunner::default());
        let views = Arc::new(MemViewStore::default());

        let registry = TaskRegistry::new(handle.map(TASKS_MAP));
        let assignments = NodeAssignments::new(handle.map(NODE_TASKS_MAP));
        let gate = QuorumGate::new();
        let view = ClusterViewService::new("test-cluster".to_string(), views.clone());

        let trigger = Arc::new(TaskTriggerService::new(
            handle.clone(),
            registry.clone(),
            assignments.clone(),
            tasks.clone(),
            schedules.clone(),
            resolver.clone(),
            runner.clone(),
        ));

        let membership = MembershipHandler::new(
            handle.clone(),
            assignments.clone(),
            trigger.clone(),
            gate.clone(),
            view,
        );
        let migration = MigrationHandler::new(
            handle.clone(),
            registry.clone(),
            assignments.clone(),
            trigger.clone(),
            gate.clone(),
        );
        let listener = RegistryListener::new(
            handle.clone(),
            registry.clone(),
            assignments.clone(),
            tasks.clone(),
            trigger.clone(),
            gate.clone(),
        );
        let bootstrap = Bootstrapper::new(
            handle.clone(),
            registry.clone(),
            tasks.clone(),
            schedules.clone(),
            runner.clone(),
            gate.clone(),
        );

        Self {
            grid: handle,
            registry,
            assignments,
            gate,
            trigger,
            membership,
            migration,
            listener,
            bootstrap,
            tasks,
            schedules,
            resolver,
            runner,
            views,
        }
    }

    pub fn me(&self) -> GridMember {
        self.grid.me().clone()
    }

    pub fn insert_task(&self, id: &str, status: TaskStatus, scheduled: bool) {
        self.tasks.insert(task_record(id, status, scheduled));
    }

    pub fn insert_schedule(&self, id: &str, status: ScheduleStatus) {
        self.schedules.insert(ScheduleSpec {
            id: id.to_string(),
            status,
            cron_expression: Some("0 0 * * * *".to_string()),
            scheduled_at: None,
        });
    }
}
