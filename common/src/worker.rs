use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::results::SubmitOutcome;
use crate::task::{TaskAssignment, TaskId};

pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Alive,
    /// Se perdió un heartbeat; todavía no se reasigna nada
    Suspected,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterRequest {
    pub worker_id: WorkerId,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegisterResponse {
    pub worker_id: WorkerId,
    /// Timeout de heartbeat configurado en el master (para que el worker
    /// elija un intervalo razonable)
    pub heartbeat_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker_id: WorkerId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu_percent: Option<f32>,
    #[serde(default)]
    pub mem_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentResponse {
    pub task: Option<TaskAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub outcome: SubmitOutcome,
}

/// El worker no pudo procesar el chunk (archivo ilegible, etc.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailureRequest {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    pub task_id: TaskId,
    pub generation: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailureResponse {
    pub requeued: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerMetrics {
    pub worker_id: WorkerId,
    pub address: String,
    pub status: WorkerStatus,
    pub last_heartbeat_secs_ago: i64,
    pub current_task_id: Option<TaskId>,
    pub tasks_assigned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub cpu_percent: Option<f32>,
    pub mem_bytes: Option<u64>,
}
