use std::collections::BTreeSet;
use std::net::SocketAddr;

/// The unique, stable identifier of one unit of work.
pub type TaskId = String;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
/// The lifecycle status of a task.
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Injected,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further execution transitions can occur from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskType {
    Injection,
    Remediation,
    Resiliency,
}

#[derive(Clone, Debug)]
/// One fault/remediation/resiliency unit of work, as persisted durably.
///
/// Created by the request-handling layer; mutated only through the trigger
/// service or the executing strategy. Immutable once terminal.
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// The execution strategy (extension) which built this task.
    pub extension_name: String,
    /// Whether the task is driven by a recurring/future schedule.
    pub scheduled: bool,
    /// Task-specific payload, opaque to the coordination layer.
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleStatus {
    Initializing,
    Scheduled,
    Paused,
    Cancelled,
    Finished,
}

impl ScheduleStatus {
    /// Whether the schedule should still drive executions.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Scheduled)
    }
}

#[derive(Clone, Debug)]
/// The schedule attached to a scheduled task.
pub struct ScheduleSpec {
    pub id: TaskId,
    pub status: ScheduleStatus,
    /// Cron expression for recurring schedules.
    pub cron_expression: Option<String>,
    /// Epoch millis for one-shot schedules.
    pub scheduled_at: Option<u64>,
}

#[derive(Clone, Debug)]
/// A fully resolved, ready-to-submit unit of execution.
///
/// Endpoint and credential resolution happen in the execution-strategy
/// layer; this type only carries the result across the trigger boundary.
pub struct ExecutionPlan {
    pub task: TaskRecord,
    pub endpoint_name: String,
    pub credential_name: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
/// The caches which participate in multi-node resync broadcasts.
///
/// These are not partition-owned like the task registry; they refresh
/// best-effort after another node mutates the backing store.
pub enum ResourceKind {
    Credentials,
    ClusterConfig,
    MetricProvider,
    Plugin,
    User,
}

#[derive(Clone, Debug, Eq, PartialEq)]
/// The durable record of cluster topology, updated on every join/leave.
pub struct ClusterView {
    pub cluster_name: String,
    pub members: BTreeSet<SocketAddr>,
    /// The address of the oldest live member, used to elect which node
    /// performs cluster-wide bootstrap work.
    pub oldest: Option<SocketAddr>,
}

impl ClusterView {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            members: BTreeSet::new(),
            oldest: None,
        }
    }
}
