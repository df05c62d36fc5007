use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    CoordinatorError, JobInfo, JobRequest, JobResults, MetricsSnapshot, PartialResult,
    SubmitResultResponse, TaskAssignmentRequest, TaskAssignmentResponse, TaskFailureRequest,
    TaskFailureResponse, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
use std::sync::MutexGuard;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::state::AppState;

type ApiError = (StatusCode, String);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_jobs).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job).delete(cancel_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .route("/api/v1/jobs/:id/metrics", get(get_job_metrics))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/result", post(submit_result))
        .route("/api/v1/tasks/fail", post(fail_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_of(e: &CoordinatorError) -> StatusCode {
    match e {
        CoordinatorError::UnknownJob(_)
        | CoordinatorError::UnknownTask(_)
        | CoordinatorError::UnknownWorker(_)
        | CoordinatorError::NoInputFiles(_) => StatusCode::NOT_FOUND,
        CoordinatorError::InvalidGlob(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::Chunking(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoordinatorError::FutureGeneration { .. }
        | CoordinatorError::GenerationMismatch { .. }
        | CoordinatorError::InvalidTransition { .. } => StatusCode::CONFLICT,
    }
}

fn api_error(e: CoordinatorError) -> ApiError {
    (status_of(&e), e.to_string())
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Coordinator>, ApiError> {
    state.coordinator.lock().map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "lock del coordinador envenenado".to_string(),
        )
    })
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Un job por cada archivo que haga match con input_glob
async fn create_jobs(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<Vec<JobInfo>>, ApiError> {
    let mut coordinator = lock(&state)?;
    match coordinator.submit_jobs(&req, Utc::now()) {
        Ok(jobs) => {
            info!("'{}': {} job(s) creados para {}", req.name, jobs.len(), req.input_glob);
            Ok(Json(jobs))
        }
        Err(e) => {
            warn!("no se pudo crear el job '{}': {}", req.name, e);
            Err(api_error(e))
        }
    }
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobInfo>>, ApiError> {
    Ok(Json(lock(&state)?.list_jobs()))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    lock(&state)?
        .job_info(&id)
        .map(Json)
        .ok_or_else(|| api_error(CoordinatorError::UnknownJob(id)))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, ApiError> {
    lock(&state)?
        .cancel_job(&id, Utc::now())
        .map(Json)
        .map_err(api_error)
}

// Totales (parciales si el job sigue corriendo) + snapshot de ventanas
async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResults>, ApiError> {
    lock(&state)?
        .job_results(&id, Utc::now())
        .map(Json)
        .ok_or_else(|| api_error(CoordinatorError::UnknownJob(id)))
}

// Se sirve del último snapshot publicado, sin tomar el lock
async fn get_job_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    state
        .snapshots
        .borrow()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(CoordinatorError::UnknownJob(id)))
}

async fn list_workers(State(state): State<AppState>) -> Result<Json<Vec<WorkerMetrics>>, ApiError> {
    Ok(Json(lock(&state)?.list_workers(Utc::now())))
}

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Result<Json<WorkerRegisterResponse>, ApiError> {
    let mut coordinator = lock(&state)?;
    coordinator.register_worker(&req.worker_id, &req.address, Utc::now());
    let heartbeat_timeout_secs = coordinator.config().heartbeat_timeout.num_seconds().max(1) as u64;

    Ok(Json(WorkerRegisterResponse {
        worker_id: req.worker_id,
        heartbeat_timeout_secs,
    }))
}

// Un heartbeat de un id desconocido lo registra
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, ApiError> {
    lock(&state)?.heartbeat(&req, Utc::now());
    Ok(Json(WorkerHeartbeatResponse { ok: true }))
}

// Entrega la tarea asignada al worker (si tiene)
async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Result<Json<TaskAssignmentResponse>, ApiError> {
    let task = lock(&state)?
        .next_assignment(&req.worker_id, Utc::now())
        .map_err(api_error)?;
    Ok(Json(TaskAssignmentResponse { task }))
}

async fn submit_result(
    State(state): State<AppState>,
    Json(result): Json<PartialResult>,
) -> Result<Json<SubmitResultResponse>, ApiError> {
    let outcome = lock(&state)?
        .submit_result(&result, Utc::now())
        .map_err(api_error)?;
    Ok(Json(SubmitResultResponse { outcome }))
}

async fn fail_task(
    State(state): State<AppState>,
    Json(req): Json<TaskFailureRequest>,
) -> Result<Json<TaskFailureResponse>, ApiError> {
    let requeued = lock(&state)?
        .report_failure(&req, Utc::now())
        .map_err(api_error)?;
    Ok(Json(TaskFailureResponse { requeued }))
}
