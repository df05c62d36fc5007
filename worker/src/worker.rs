use anyhow::{bail, Result};
use chrono::Utc;
use common::analyzer::analyze_chunk;
use common::{
    PartialResult, SubmitOutcome, SubmitResultResponse, TaskAssignment, TaskAssignmentRequest,
    TaskAssignmentResponse, TaskFailureRequest, TaskFailureResponse, WorkerHeartbeatRequest,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Espera exponencial: base * 2^attempt, con tope.
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Respuesta de `/tasks/next`.
#[derive(Debug)]
pub enum Poll {
    Task(TaskAssignment),
    Idle,
    /// El master no nos conoce (se reinició o nos dio por muertos hace rato)
    Unregistered,
}

/// Cliente HTTP del plano de control del master.
#[derive(Clone)]
pub struct MasterClient {
    http: Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, worker_id: &str, address: &str) -> Result<WorkerRegisterResponse> {
        let resp = self
            .http
            .post(self.url("/api/v1/workers/register"))
            .json(&WorkerRegisterRequest {
                worker_id: worker_id.to_string(),
                address: address.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn heartbeat(&self, req: &WorkerHeartbeatRequest) -> Result<()> {
        self.http
            .post(self.url("/api/v1/workers/heartbeat"))
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn next_task(&self, worker_id: &str) -> Result<Poll> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks/next"))
            .json(&TaskAssignmentRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Poll::Unregistered);
        }
        let body: TaskAssignmentResponse = resp.error_for_status()?.json().await?;
        Ok(body.task.map(Poll::Task).unwrap_or(Poll::Idle))
    }

    /// Devuelve `Ok(None)` si el master rechazó el resultado (4xx):
    /// reintentar no cambia nada.
    pub async fn submit_result(&self, result: &PartialResult) -> Result<Option<SubmitOutcome>> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks/result"))
            .json(result)
            .send()
            .await?;

        let status = resp.status();
        if status.is_client_error() {
            let msg = resp.text().await.unwrap_or_default();
            warn!("el master rechazó el resultado de {} ({}): {}", result.task_id, status, msg);
            return Ok(None);
        }
        let body: SubmitResultResponse = resp.error_for_status()?.json().await?;
        Ok(Some(body.outcome))
    }

    pub async fn report_failure(&self, req: &TaskFailureRequest) -> Result<bool> {
        let resp = self
            .http
            .post(self.url("/api/v1/tasks/fail"))
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        let body: TaskFailureResponse = resp.json().await?;
        Ok(body.requeued)
    }
}

async fn register_with_backoff(master: &MasterClient, config: &WorkerConfig) -> WorkerRegisterResponse {
    let mut attempt = 0;
    loop {
        match master.register(&config.worker_id, &config.address).await {
            Ok(resp) => {
                info!(
                    "worker {} registrado contra {} (timeout de heartbeat {}s)",
                    resp.worker_id, config.master_url, resp.heartbeat_timeout_secs
                );
                return resp;
            }
            Err(e) => {
                let wait = backoff(attempt, BACKOFF_BASE, BACKOFF_MAX);
                warn!("no se pudo registrar ({}), reintento en {:?}", e, wait);
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Heartbeats periódicos con CPU/MEM. Corre en su propia tarea para que un
/// chunk largo no nos haga parecer muertos.
async fn heartbeat_loop(master: MasterClient, worker_id: String, every: Duration) {
    let mut sys = System::new_all();
    loop {
        sys.refresh_cpu();
        sys.refresh_memory();

        let req = WorkerHeartbeatRequest {
            worker_id: worker_id.clone(),
            timestamp: Utc::now(),
            cpu_percent: Some(sys.global_cpu_info().cpu_usage()),
            mem_bytes: Some(sys.used_memory()),
        };
        if let Err(e) = master.heartbeat(&req).await {
            warn!("heartbeat fallido: {}", e);
        }

        sleep(every).await;
    }
}

async fn submit_with_retry(master: &MasterClient, result: &PartialResult, max_retries: u32) -> Result<Option<SubmitOutcome>> {
    let mut attempt = 0;
    loop {
        match master.submit_result(result).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < max_retries => {
                let wait = backoff(attempt, BACKOFF_BASE, BACKOFF_MAX);
                warn!(
                    "error enviando resultado de {} ({}), reintento {}/{} en {:?}",
                    result.task_id,
                    e,
                    attempt + 1,
                    max_retries,
                    wait
                );
                sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Procesa un chunk: lo analiza en un hilo de bloqueo y manda el resultado.
async fn process(master: &MasterClient, config: &WorkerConfig, task: TaskAssignment) -> Result<()> {
    info!(
        "tengo tarea {} (gen={}) del job {}: {} bytes {}..{}",
        task.task_id,
        task.generation,
        task.job_id,
        task.chunk.file_id,
        task.chunk.start_offset,
        task.chunk.end_offset
    );

    let for_blocking = task.clone();
    let analyzed = tokio::task::spawn_blocking(move || analyze_chunk(&for_blocking)).await;

    let stats = match analyzed {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => return report(master, config, &task, format!("error leyendo chunk: {}", e)).await,
        Err(e) => return report(master, config, &task, format!("panic analizando chunk: {}", e)).await,
    };

    let result = stats.into_partial_result(&task, &config.worker_id);
    debug!(
        "tarea {}: {} líneas, {} errores, {} requests",
        task.task_id, result.line_count, result.error_count, result.request_count
    );

    match submit_with_retry(master, &result, config.submit_max_retries).await? {
        Some(SubmitOutcome::Accepted) => info!("resultado de {} aceptado", task.task_id),
        Some(other) => info!("resultado de {} descartado por el master: {:?}", task.task_id, other),
        None => {}
    }
    Ok(())
}

async fn report(master: &MasterClient, config: &WorkerConfig, task: &TaskAssignment, reason: String) -> Result<()> {
    warn!("tarea {} fallida: {}", task.task_id, reason);
    let requeued = master
        .report_failure(&TaskFailureRequest {
            worker_id: config.worker_id.clone(),
            job_id: task.job_id.clone(),
            task_id: task.task_id.clone(),
            generation: task.generation,
            reason,
        })
        .await?;
    if !requeued {
        debug!("el master no reencoló {} (ya reasignada o job terminado)", task.task_id);
    }
    Ok(())
}

/// Loop principal del worker.
/// - Se registra en el master (con backoff).
/// - Manda heartbeats en una tarea aparte.
/// - Pide su tarea y procesa un chunk a la vez.
pub async fn run(config: WorkerConfig) -> Result<()> {
    if config.master_url.is_empty() {
        bail!("MASTER_URL vacío");
    }
    let master = MasterClient::new(&config.master_url);

    let registered = register_with_backoff(&master, &config).await;
    let every = config.heartbeat_every(registered.heartbeat_timeout_secs);
    tokio::spawn(heartbeat_loop(master.clone(), config.worker_id.clone(), every));

    let mut errors: u32 = 0;
    loop {
        match master.next_task(&config.worker_id).await {
            Ok(Poll::Task(task)) => {
                errors = 0;
                let task_id = task.task_id.clone();
                if let Err(e) = process(&master, &config, task).await {
                    warn!("no se pudo entregar la tarea {}: {}", task_id, e);
                }
            }
            Ok(Poll::Idle) => {
                errors = 0;
                debug!("worker {} pidió tarea pero no hay", config.worker_id);
                sleep(config.poll_interval).await;
            }
            Ok(Poll::Unregistered) => {
                warn!("el master no reconoce al worker {}, re-registrando", config.worker_id);
                register_with_backoff(&master, &config).await;
            }
            Err(e) => {
                let wait = backoff(errors, config.poll_interval, BACKOFF_MAX);
                warn!("error pidiendo tarea ({}), reintento en {:?}", e, wait);
                sleep(wait).await;
                errors = errors.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_duplica_hasta_el_tope() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(backoff(0, base, max), Duration::from_millis(100));
        assert_eq!(backoff(1, base, max), Duration::from_millis(200));
        assert_eq!(backoff(3, base, max), Duration::from_millis(800));
        assert_eq!(backoff(4, base, max), max);
        assert_eq!(backoff(u32::MAX, base, max), max);
    }

    #[test]
    fn master_client_builds_urls() {
        let m = MasterClient::new("http://master:8080");
        assert_eq!(m.url("/api/v1/tasks/next"), "http://master:8080/api/v1/tasks/next");
    }
}
