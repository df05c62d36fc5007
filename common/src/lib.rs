pub mod analyzer;
pub mod chunker;
pub mod error;
pub mod job;
pub mod record;
pub mod results;
pub mod task;
pub mod worker;

pub use error::{ChunkingError, CoordinatorError, SchedulerError};
pub use job::{JobId, JobInfo, JobRequest, JobStatus};
pub use results::{
    JobResults, MetricsSnapshot, PartialResult, SecondSample, SubmitOutcome, TimeRange, Totals,
    WindowMetrics,
};
pub use task::{Chunk, Task, TaskAssignment, TaskId, TaskState};
pub use worker::{
    SubmitResultResponse, TaskAssignmentRequest, TaskAssignmentResponse, TaskFailureRequest,
    TaskFailureResponse, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId,
    WorkerMetrics, WorkerRegisterRequest, WorkerRegisterResponse, WorkerStatus,
};
