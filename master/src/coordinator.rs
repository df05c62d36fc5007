//! Coordinador: compone registro, monitor, scheduler, agregador y métricas.
//!
//! Todo el estado mutable vive en un `Coordinator` que se usa detrás de un
//! único `Mutex` (ver `state.rs`), así cada evento (heartbeat, resultado,
//! tick) se aplica completo antes del siguiente.

use chrono::{DateTime, Utc};
use common::chunker::{plan_file, ChunkTarget};
use common::{
    Chunk, CoordinatorError, JobId, JobInfo, JobRequest, JobResults, JobStatus, MetricsSnapshot,
    PartialResult, SchedulerError, SubmitOutcome, TaskAssignment, TaskFailureRequest, TaskId,
    TaskState, WorkerHeartbeatRequest, WorkerId, WorkerMetrics,
};
use glob::glob;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregator::ResultAggregator;
use crate::config::CoordinatorConfig;
use crate::metrics::MetricsEngine;
use crate::monitor::{HeartbeatMonitor, WorkerLost};
use crate::registry::{HeartbeatOutcome, WorkerRegistry};
use crate::scheduler::{Assignment, TaskScheduler, WorkerSlot};

pub type SnapshotMap = HashMap<JobId, MetricsSnapshot>;

/// Estado de un job en curso. Se destruye al terminar o cancelarse.
#[derive(Debug)]
pub struct JobState {
    info: JobInfo,
    scheduler: TaskScheduler,
    aggregator: ResultAggregator,
    metrics: MetricsEngine,
    // desde cuándo no hay workers vivos para sus tareas pendientes
    no_workers_since: Option<DateTime<Utc>>,
    // fallos reportados por los workers, por tarea
    failures: HashMap<TaskId, u32>,
}

impl JobState {
    fn info(&self) -> JobInfo {
        let mut info = self.info.clone();
        info.total_tasks = self.scheduler.total() as u32;
        info.completed_tasks = self.scheduler.completed() as u32;
        info.reassignments = self.scheduler.reassignments();
        info
    }

    fn results(&self, now: DateTime<Utc>) -> JobResults {
        let totals = self.aggregator.totals().clone();
        JobResults {
            job_id: self.info.id.clone(),
            status: self.info.status,
            error_rate: totals.error_rate(),
            avg_response_time_ms: totals.avg_response_time_ms(),
            totals,
            metrics: self.metrics.snapshot(now),
        }
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }
}

/// Lo que queda de un job terminado.
#[derive(Debug, Clone)]
struct FinishedJob {
    info: JobInfo,
    results: JobResults,
    // generación aceptada de cada chunk, para distinguir reenvíos de stale
    accepted: HashMap<TaskId, u64>,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    registry: WorkerRegistry,
    monitor: HeartbeatMonitor,
    jobs: HashMap<JobId, JobState>,
    // orden de llegada, para repartir workers entre jobs
    job_order: Vec<JobId>,
    finished: HashMap<JobId, FinishedJob>,
    snapshots: watch::Sender<SnapshotMap>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (snapshots, _rx) = watch::channel(SnapshotMap::new());
        Self {
            monitor: HeartbeatMonitor::new(config.heartbeat_timeout),
            config,
            registry: WorkerRegistry::new(),
            jobs: HashMap::new(),
            job_order: Vec::new(),
            finished: HashMap::new(),
            snapshots,
        }
    }

    /// Receptor de los snapshots de métricas publicados tras cada merge.
    /// Leerlo nunca espera al lock del coordinador.
    pub fn subscribe(&self) -> watch::Receiver<SnapshotMap> {
        self.snapshots.subscribe()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn job_state(&self, job_id: &str) -> Option<&JobState> {
        self.jobs.get(job_id)
    }

    /* ---------------- workers ---------------- */

    pub fn register_worker(&mut self, worker_id: &str, address: &str, now: DateTime<Utc>) {
        let lost = self.registry.register(worker_id, address, now);
        debug!("{} worker(s) conocidos", self.registry.len());
        if let Some((job_id, task_id)) = lost {
            warn!(
                "worker {} se re-registró con la tarea {} en vuelo; se reasigna",
                worker_id, task_id
            );
            self.reassign_task(&job_id, &task_id, "worker reiniciado");
        }
    }

    pub fn heartbeat(&mut self, req: &WorkerHeartbeatRequest, now: DateTime<Utc>) -> HeartbeatOutcome {
        let outcome = self.registry.record_heartbeat(&req.worker_id, now);
        if outcome == HeartbeatOutcome::Registered {
            info!("heartbeat de worker desconocido {}: registrado", req.worker_id);
        }
        self.registry
            .record_stats(&req.worker_id, req.cpu_percent, req.mem_bytes);
        outcome
    }

    pub fn list_workers(&self, now: DateTime<Utc>) -> Vec<WorkerMetrics> {
        self.registry.iter().map(|w| w.to_metrics(now)).collect()
    }

    /* ---------------- jobs ---------------- */

    fn target_for(&self, req: &JobRequest) -> ChunkTarget {
        match (req.chunk_size_bytes, req.chunk_count) {
            (Some(size), _) => ChunkTarget::Size(size),
            (None, Some(n)) => ChunkTarget::Count(n),
            (None, None) => ChunkTarget::Count(self.config.default_chunk_count),
        }
    }

    /// Crea un job por cada archivo que haga match con `input_glob`.
    ///
    /// Primero se planean todos los archivos: si alguno falla el chunking
    /// no se crea ningún job.
    pub fn submit_jobs(
        &mut self,
        req: &JobRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobInfo>, CoordinatorError> {
        let entries =
            glob(&req.input_glob).map_err(|e| CoordinatorError::InvalidGlob(e.to_string()))?;
        let paths: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
        if paths.is_empty() {
            return Err(CoordinatorError::NoInputFiles(req.input_glob.clone()));
        }

        let target = self.target_for(req);
        let mut planned: Vec<(PathBuf, Vec<Chunk>)> = Vec::with_capacity(paths.len());
        for path in paths {
            let chunks = plan_file(&path, target, self.config.max_record_bytes)?;
            planned.push((path, chunks));
        }

        Ok(planned
            .into_iter()
            .map(|(path, chunks)| self.create_job(&req.name, path, chunks, now))
            .collect())
    }

    fn create_job(
        &mut self,
        name: &str,
        path: PathBuf,
        chunks: Vec<Chunk>,
        now: DateTime<Utc>,
    ) -> JobInfo {
        let job_id = uuid::Uuid::new_v4().to_string();
        let file_size = chunks.last().map(|c| c.end_offset).unwrap_or(0);
        let input_path = path.to_string_lossy().to_string();

        info!(
            "job {} creado para {} ({} bytes, {} chunks)",
            job_id,
            input_path,
            file_size,
            chunks.len()
        );

        let state = JobState {
            info: JobInfo {
                id: job_id.clone(),
                name: name.to_string(),
                status: JobStatus::Accepted,
                input_path,
                file_size,
                submitted_at: now,
                started_at: None,
                finished_at: None,
                total_tasks: chunks.len() as u32,
                completed_tasks: 0,
                reassignments: 0,
                failure: None,
            },
            scheduler: TaskScheduler::new(&job_id, chunks, now),
            aggregator: ResultAggregator::new(),
            metrics: MetricsEngine::new(self.config.minute_retention, self.config.second_retention),
            no_workers_since: None,
            failures: HashMap::new(),
        };

        let empty = state.scheduler.total() == 0;
        let created = state.info();
        self.snapshots.send_modify(|m| {
            m.insert(job_id.clone(), MetricsSnapshot::empty(now));
        });
        self.jobs.insert(job_id.clone(), state);
        self.job_order.push(job_id.clone());

        if empty {
            // archivo vacío: no hay nada que repartir
            self.finish_job(&job_id, JobStatus::Succeeded, None, now);
        }

        self.job_info(&job_id).unwrap_or(created)
    }

    /// Saca el job de los activos y guarda su resumen.
    fn finish_job(
        &mut self,
        job_id: &str,
        status: JobStatus,
        failure: Option<String>,
        now: DateTime<Utc>,
    ) {
        let Some(state) = self.jobs.remove(job_id) else {
            return;
        };
        self.job_order.retain(|id| id != job_id);
        self.registry.release_job(job_id);

        let mut info = state.info();
        info.status = status;
        info.finished_at = Some(now);
        info.failure = failure;

        let mut results = state.results(now);
        results.status = status;

        match status {
            JobStatus::Succeeded => info!(
                "job {} terminado: {} líneas, {} errores, {} requests",
                job_id, results.totals.line_count, results.totals.error_count, results.totals.request_count
            ),
            _ => warn!("job {} terminado con estado {:?}", job_id, status),
        }
        debug!(
            "job {}: {} resultados stale, {} duplicados, {} líneas fuera de retención",
            job_id,
            state.aggregator.stale_count(),
            state.aggregator.duplicate_count(),
            state.metrics.minutes().late_dropped() + state.metrics.seconds().late_dropped()
        );

        let snapshot = results.metrics.clone();
        self.snapshots.send_modify(|m| {
            m.insert(job_id.to_string(), snapshot);
        });
        let accepted = state.aggregator.accepted_generations();
        self.finished.insert(
            job_id.to_string(),
            FinishedJob {
                info,
                results,
                accepted,
            },
        );
    }

    pub fn cancel_job(&mut self, job_id: &str, now: DateTime<Utc>) -> Result<JobInfo, CoordinatorError> {
        if let Some(done) = self.finished.get(job_id) {
            return Ok(done.info.clone());
        }
        if !self.jobs.contains_key(job_id) {
            return Err(CoordinatorError::UnknownJob(job_id.to_string()));
        }
        info!("cancelando job {}", job_id);
        self.finish_job(job_id, JobStatus::Cancelled, None, now);
        self.job_info(job_id)
            .ok_or_else(|| CoordinatorError::UnknownJob(job_id.to_string()))
    }

    pub fn job_info(&self, job_id: &str) -> Option<JobInfo> {
        if let Some(state) = self.jobs.get(job_id) {
            return Some(state.info());
        }
        self.finished.get(job_id).map(|f| f.info.clone())
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let mut out: Vec<JobInfo> = self
            .jobs
            .values()
            .map(JobState::info)
            .chain(self.finished.values().map(|f| f.info.clone()))
            .collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        out
    }

    pub fn job_results(&self, job_id: &str, now: DateTime<Utc>) -> Option<JobResults> {
        if let Some(state) = self.jobs.get(job_id) {
            return Some(state.results(now));
        }
        self.finished.get(job_id).map(|f| f.results.clone())
    }

    /* ---------------- ticks ---------------- */

    /// Pasada de asignación sobre todos los jobs activos.
    pub fn schedule_tick(&mut self, now: DateTime<Utc>) -> Vec<Assignment> {
        let mut slots: Vec<WorkerSlot> = self
            .registry
            .list_alive()
            .into_iter()
            .map(|w| WorkerSlot {
                worker_id: w.worker_id.clone(),
                busy: !w.is_idle(),
                load: w.tasks_assigned,
            })
            .collect();

        let mut assigned: Vec<Assignment> = Vec::new();
        let mut to_fail: Vec<(JobId, String)> = Vec::new();

        for job_id in &self.job_order {
            let Some(job) = self.jobs.get_mut(job_id) else {
                continue;
            };
            if !job.scheduler.has_waiting() {
                continue;
            }

            match job.scheduler.schedule(&mut slots, now) {
                Ok(batch) => {
                    job.no_workers_since = None;
                    if job.info.status == JobStatus::Degraded {
                        info!("job {}: vuelve a haber workers vivos", job_id);
                        job.info.status = if job.info.started_at.is_some() {
                            JobStatus::Running
                        } else {
                            JobStatus::Accepted
                        };
                    }
                    if !batch.is_empty() && job.info.status == JobStatus::Accepted {
                        job.info.status = JobStatus::Running;
                        job.info.started_at.get_or_insert(now);
                    }
                    assigned.extend(batch);
                }
                Err(SchedulerError::NoWorkersAvailable) => {
                    let since = *job.no_workers_since.get_or_insert(now);
                    if job.info.status != JobStatus::Degraded {
                        warn!("job {}: no hay workers disponibles, queda degradado", job_id);
                        job.info.status = JobStatus::Degraded;
                    }
                    if now - since > self.config.no_workers_timeout {
                        to_fail.push((
                            job_id.clone(),
                            format!(
                                "sin workers disponibles durante más de {}s",
                                self.config.no_workers_timeout.num_seconds()
                            ),
                        ));
                    }
                }
            }
        }

        for a in &assigned {
            if let Err(e) = self
                .registry
                .assign(&a.worker_id, &a.task.job_id, &a.task.task_id)
            {
                warn!("no se pudo anotar la asignación de {}: {}", a.task.task_id, e);
            }
        }

        for (job_id, reason) in to_fail {
            self.finish_job(&job_id, JobStatus::Failed, Some(reason), now);
        }

        assigned
    }

    /// Scan de heartbeats + timeout de ejecución de tareas.
    pub fn monitor_tick(&mut self, now: DateTime<Utc>) -> Vec<WorkerLost> {
        let lost = self.monitor.scan(&mut self.registry, now);
        for event in &lost {
            self.on_worker_lost(&event.worker_id);
        }

        if let Some(timeout) = self.config.task_timeout {
            let mut stuck: Vec<(JobId, TaskId, WorkerId)> = Vec::new();
            for (job_id, job) in &self.jobs {
                for (task_id, worker_id) in job.scheduler.expired(now, timeout) {
                    stuck.push((job_id.clone(), task_id, worker_id));
                }
            }
            for (job_id, task_id, worker_id) in stuck {
                warn!(
                    "tarea {} lleva más de {}s en el worker {}: se trata como perdida",
                    task_id,
                    timeout.num_seconds(),
                    worker_id
                );
                self.registry.release(&worker_id, &task_id, false);
                self.reassign_task(&job_id, &task_id, "timeout de ejecución");
            }
        }

        lost
    }

    fn on_worker_lost(&mut self, worker_id: &str) {
        for job in self.jobs.values_mut() {
            let moved = job.scheduler.on_worker_lost(worker_id);
            if !moved.is_empty() {
                info!(
                    "job {}: {} tarea(s) del worker {} vuelven a la cola",
                    job.info.id,
                    moved.len(),
                    worker_id
                );
            }
        }
    }

    fn reassign_task(&mut self, job_id: &str, task_id: &str, reason: &str) -> bool {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        match job.scheduler.reassign(task_id, reason) {
            Ok(_) => true,
            Err(e) => {
                debug!("no se reasigna {}: {}", task_id, e);
                false
            }
        }
    }

    /* ---------------- control plane ---------------- */

    /// El worker pide su tarea (entrega de assignTask). Si está libre se
    /// corre una pasada de asignación en el momento.
    pub fn next_assignment(
        &mut self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskAssignment>, CoordinatorError> {
        let idle = self
            .registry
            .get(worker_id)
            .map(|w| w.is_idle())
            .ok_or_else(|| CoordinatorError::UnknownWorker(worker_id.to_string()))?;

        if idle {
            self.schedule_tick(now);
        }

        let Some(worker) = self.registry.get(worker_id) else {
            return Ok(None);
        };
        let (Some(job_id), Some(task_id)) =
            (worker.current_job_id.clone(), worker.current_task_id.clone())
        else {
            return Ok(None);
        };

        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(CoordinatorError::UnknownJob(job_id))?;
        job.scheduler.start(&task_id, worker_id).map(Some)
    }

    /// submitResult: accepted | duplicate | stale.
    pub fn submit_result(
        &mut self,
        result: &PartialResult,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        if let Some(done) = self.finished.get(&result.job_id) {
            let outcome = match done.accepted.get(&result.task_id) {
                Some(&accepted) if accepted == result.generation => SubmitOutcome::Duplicate,
                _ => SubmitOutcome::Stale,
            };
            debug!(
                "resultado de {} para job ya terminado {}: {:?}",
                result.task_id, result.job_id, outcome
            );
            return Ok(outcome);
        }

        let job = self
            .jobs
            .get_mut(&result.job_id)
            .ok_or_else(|| CoordinatorError::UnknownJob(result.job_id.clone()))?;

        let task = job
            .scheduler
            .task(&result.task_id)
            .ok_or_else(|| CoordinatorError::UnknownTask(result.task_id.clone()))?;
        let generation = task.generation;
        let state = task.state;
        let owner = task.assigned_worker.clone();

        // una generación que nadie recibió todavía no se puede completar
        if result.generation == generation
            && !(state.is_active() || state == TaskState::Completed)
        {
            return Err(CoordinatorError::InvalidTransition {
                task_id: result.task_id.clone(),
                from: state,
                to: TaskState::Completed,
            });
        }

        let outcome = job.aggregator.merge(generation, result)?;
        match outcome {
            SubmitOutcome::Accepted => {
                job.scheduler.complete(&result.task_id, generation)?;
                job.metrics.record(result);
                let snapshot = job.metrics.snapshot(now);
                let done = job.scheduler.is_complete();
                let job_id = result.job_id.clone();

                if let Some(owner) = owner {
                    self.registry.release(&owner, &result.task_id, true);
                }
                self.snapshots.send_modify(|m| {
                    m.insert(job_id.clone(), snapshot);
                });

                if done {
                    self.finish_job(&job_id, JobStatus::Succeeded, None, now);
                }
            }
            SubmitOutcome::Stale => info!(
                "descartado resultado stale de {} (gen {}) del worker {}",
                result.task_id, result.generation, result.worker_id
            ),
            SubmitOutcome::Duplicate => {}
        }

        Ok(outcome)
    }

    /// El worker no pudo procesar su chunk: se reasigna con generación +1.
    /// Devuelve `false` si el reporte es viejo (otra generación) o el job ya no está.
    pub fn report_failure(
        &mut self,
        req: &TaskFailureRequest,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        if self.finished.contains_key(&req.job_id) {
            return Ok(false);
        }
        let job = self
            .jobs
            .get_mut(&req.job_id)
            .ok_or_else(|| CoordinatorError::UnknownJob(req.job_id.clone()))?;
        let task = job
            .scheduler
            .task(&req.task_id)
            .ok_or_else(|| CoordinatorError::UnknownTask(req.task_id.clone()))?;

        if task.generation != req.generation || !task.state.is_active() {
            debug!(
                "reporte de fallo viejo para {} (gen {} vs {})",
                req.task_id, req.generation, task.generation
            );
            return Ok(false);
        }

        let failures = job.failures.entry(req.task_id.clone()).or_insert(0);
        *failures += 1;
        let failures = *failures;

        warn!(
            "worker {} reporta fallo en {} ({}/{}): {}",
            req.worker_id, req.task_id, failures, self.config.max_task_failures, req.reason
        );
        self.registry.release(&req.worker_id, &req.task_id, false);

        if failures >= self.config.max_task_failures {
            let reason = format!(
                "la tarea {} falló {} veces: {}",
                req.task_id, failures, req.reason
            );
            self.finish_job(&req.job_id, JobStatus::Failed, Some(reason), now);
            return Ok(false);
        }
        Ok(self.reassign_task(&req.job_id, &req.task_id, &req.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::analyzer::analyze_chunk;
    use common::WorkerStatus;
    use std::{env, fs, io::Write};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("coordinator_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            heartbeat_timeout: Duration::seconds(15),
            task_timeout: None,
            ..CoordinatorConfig::default()
        }
    }

    fn write_log(dir: &PathBuf, name: &str, lines: &[String]) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(f, "{}", l).unwrap();
        }
        path
    }

    fn request(path: &PathBuf, chunks: u32) -> JobRequest {
        JobRequest {
            name: "test".to_string(),
            input_glob: path.to_string_lossy().to_string(),
            chunk_count: Some(chunks),
            chunk_size_bytes: None,
        }
    }

    /// 4 líneas por chunk, un error por chunk, marcas de tiempo crecientes.
    fn four_chunk_log() -> Vec<String> {
        (0..16)
            .map(|i| {
                if i % 4 == 3 {
                    format!("2024-03-01T12:00:{:02}Z ERROR Database connection failed", i)
                } else {
                    format!("2024-03-01T12:00:{:02}Z INFO Request processed in {}ms", i, 100 + i)
                }
            })
            .collect()
    }

    fn heartbeat(c: &mut Coordinator, worker: &str, at: DateTime<Utc>) {
        c.heartbeat(
            &WorkerHeartbeatRequest {
                worker_id: worker.to_string(),
                timestamp: at,
                cpu_percent: None,
                mem_bytes: None,
            },
            at,
        );
    }

    /// Lo que hace un worker real: leer su rango y armar el PartialResult.
    fn run_worker(a: &TaskAssignment, worker: &str) -> PartialResult {
        analyze_chunk(a).unwrap().into_partial_result(a, worker)
    }

    #[test]
    fn three_line_sample_as_one_chunk() {
        let tmp = temp_dir("three_lines");
        let path = write_log(
            &tmp,
            "sample.log",
            &[
                "INFO Request processed in 127ms".to_string(),
                "ERROR Database connection failed".to_string(),
                "INFO Request processed in 95ms".to_string(),
            ],
        );

        let mut c = Coordinator::new(config());
        let jobs = c.submit_jobs(&request(&path, 1), t0()).unwrap();
        let job_id = jobs[0].id.clone();
        assert_eq!(jobs[0].total_tasks, 1);

        c.register_worker("w1", "127.0.0.1:9001", t0());
        let a = c.next_assignment("w1", t0()).unwrap().unwrap();
        assert_eq!(a.generation, 0);

        let outcome = c.submit_result(&run_worker(&a, "w1"), t0()).unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);

        let info = c.job_info(&job_id).unwrap();
        assert_eq!(info.status, JobStatus::Succeeded);
        assert!(c.job_state(&job_id).is_none());

        let r = c.job_results(&job_id, t0()).unwrap();
        assert_eq!(r.totals.error_count, 1);
        assert_eq!(r.totals.request_count, 2);
        assert_eq!(r.avg_response_time_ms, 111.0);
        assert!(c.registry.get("w1").unwrap().is_idle());
    }

    #[test]
    fn worker_dies_mid_job_and_chunk_is_counted_once() {
        let tmp = temp_dir("worker_dies");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 4), t0()).unwrap()[0].id.clone();
        c.register_worker("A", "a:1", t0());
        c.register_worker("B", "b:1", t0());

        // primera ronda: A <- chunk 0, B <- chunk 1
        let a1 = c.next_assignment("A", t0()).unwrap().unwrap();
        let b1 = c.next_assignment("B", t0()).unwrap().unwrap();
        assert_eq!(a1.task_id, format!("{}-0", job_id));
        assert_eq!(b1.task_id, format!("{}-1", job_id));
        assert_eq!(c.submit_result(&run_worker(&a1, "A"), t0()).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(c.submit_result(&run_worker(&b1, "B"), t0()).unwrap(), SubmitOutcome::Accepted);

        // segunda ronda: A <- chunk 2 (y después muere), B <- chunk 3
        let t1 = t0() + Duration::seconds(1);
        let a2 = c.next_assignment("A", t1).unwrap().unwrap();
        let b2 = c.next_assignment("B", t1).unwrap().unwrap();
        assert_eq!(a2.task_id, format!("{}-2", job_id));
        let late_from_a = run_worker(&a2, "A");

        // A deja de mandar heartbeats; B sigue vivo
        heartbeat(&mut c, "B", t0() + Duration::seconds(10));
        c.monitor_tick(t0() + Duration::seconds(17));
        assert_eq!(c.registry.get("A").unwrap().status, WorkerStatus::Suspected);

        heartbeat(&mut c, "B", t0() + Duration::seconds(18));
        let lost = c.monitor_tick(t0() + Duration::seconds(19));
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].worker_id, "A");

        let task = c.job_state(&job_id).unwrap().scheduler().task(&a2.task_id).unwrap();
        assert_eq!(task.generation, 1);
        assert_eq!(task.state, TaskState::Reassigning);

        // B termina el chunk 3 y recibe el chunk 2 en generación 1
        let t2 = t0() + Duration::seconds(20);
        assert_eq!(c.submit_result(&run_worker(&b2, "B"), t2).unwrap(), SubmitOutcome::Accepted);
        let b3 = c.next_assignment("B", t2).unwrap().unwrap();
        assert_eq!(b3.task_id, a2.task_id);
        assert_eq!(b3.generation, 1);

        // el resultado tardío de A llega antes que el de B: stale
        assert_eq!(c.submit_result(&late_from_a, t2).unwrap(), SubmitOutcome::Stale);
        assert_eq!(c.submit_result(&run_worker(&b3, "B"), t2).unwrap(), SubmitOutcome::Accepted);
        // y si llega otra vez después de terminar el job, también
        assert_eq!(c.submit_result(&late_from_a, t2).unwrap(), SubmitOutcome::Stale);
        // el reenvío del resultado aceptado sigue siendo un duplicado
        assert_eq!(c.submit_result(&run_worker(&b3, "B"), t2).unwrap(), SubmitOutcome::Duplicate);

        let r = c.job_results(&job_id, t2).unwrap();
        assert_eq!(r.status, JobStatus::Succeeded);
        assert_eq!(r.totals.chunks, 4);
        assert_eq!(r.totals.line_count, 16);
        assert_eq!(r.totals.error_count, 4);
        assert_eq!(r.totals.request_count, 12);
        assert_eq!(c.job_info(&job_id).unwrap().reassignments, 1);
    }

    #[test]
    fn straggler_after_reassigned_chunk_completes_is_stale() {
        let tmp = temp_dir("straggler");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 2), t0()).unwrap()[0].id.clone();
        c.register_worker("A", "a", t0());
        let a = c.next_assignment("A", t0()).unwrap().unwrap();

        // A se cuelga; se registra B y A muere
        c.monitor_tick(t0() + Duration::seconds(16));
        c.register_worker("B", "b", t0() + Duration::seconds(16));
        c.monitor_tick(t0() + Duration::seconds(30));

        let t = t0() + Duration::seconds(31);
        let b = c.next_assignment("B", t).unwrap().unwrap();
        assert_eq!(b.task_id, a.task_id);
        assert_eq!(c.submit_result(&run_worker(&b, "B"), t).unwrap(), SubmitOutcome::Accepted);
        assert_eq!(c.submit_result(&run_worker(&b, "B"), t).unwrap(), SubmitOutcome::Duplicate);
        assert_eq!(c.submit_result(&run_worker(&a, "A"), t).unwrap(), SubmitOutcome::Stale);

        let state = c.job_state(&job_id).unwrap();
        assert_eq!(state.aggregator().totals().chunks, 1);
        assert_eq!(state.aggregator().accepted(&a.task_id).unwrap().worker_id, "B");
    }

    #[test]
    fn silent_worker_is_declared_dead_and_task_moves_to_next_generation() {
        let tmp = temp_dir("silent");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();

        // silencio de 20s, ticks a los 16s y 20s (<= 15s entre ellos)
        assert!(c.monitor_tick(t0() + Duration::seconds(16)).is_empty());
        assert_eq!(c.registry.get("w").unwrap().status, WorkerStatus::Suspected);
        let lost = c.monitor_tick(t0() + Duration::seconds(20));
        assert_eq!(lost[0].worker_id, "w");
        assert_eq!(c.registry.get("w").unwrap().status, WorkerStatus::Dead);

        let task = c.job_state(&job_id).unwrap().scheduler().task(&a.task_id).unwrap();
        assert_eq!(task.generation, a.generation + 1);
        assert!(task.assigned_worker.is_none());
    }

    #[test]
    fn stuck_task_is_reassigned_even_with_heartbeats() {
        let tmp = temp_dir("stuck");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut cfg = config();
        cfg.task_timeout = Some(Duration::seconds(60));
        let mut c = Coordinator::new(cfg);
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();

        for s in [10, 20, 30, 40, 50, 60, 70] {
            heartbeat(&mut c, "w", t0() + Duration::seconds(s));
            c.monitor_tick(t0() + Duration::seconds(s));
        }

        assert_eq!(c.registry.get("w").unwrap().status, WorkerStatus::Alive);
        assert!(c.registry.get("w").unwrap().is_idle());
        let task = c.job_state(&job_id).unwrap().scheduler().task(&a.task_id).unwrap();
        assert_eq!(task.generation, 1);

        // el resultado tardío de la gen 0 ya no cuenta
        let outcome = c.submit_result(&run_worker(&a, "w"), t0() + Duration::seconds(71)).unwrap();
        assert_eq!(outcome, SubmitOutcome::Stale);
    }

    #[test]
    fn no_workers_degrades_and_eventually_fails_the_job() {
        let tmp = temp_dir("no_workers");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut cfg = config();
        cfg.no_workers_timeout = Duration::seconds(30);
        let mut c = Coordinator::new(cfg);
        let job_id = c.submit_jobs(&request(&path, 2), t0()).unwrap()[0].id.clone();

        assert!(c.schedule_tick(t0()).is_empty());
        assert_eq!(c.job_info(&job_id).unwrap().status, JobStatus::Degraded);

        // aparece un worker: vuelve a estar en marcha
        c.register_worker("w", "w", t0() + Duration::seconds(5));
        let out = c.schedule_tick(t0() + Duration::seconds(5));
        assert_eq!(out.len(), 1);
        assert_eq!(c.job_info(&job_id).unwrap().status, JobStatus::Running);

        // el worker muere y nadie lo reemplaza
        c.monitor_tick(t0() + Duration::seconds(21));
        c.monitor_tick(t0() + Duration::seconds(22));
        c.schedule_tick(t0() + Duration::seconds(23));
        assert_eq!(c.job_info(&job_id).unwrap().status, JobStatus::Degraded);
        c.schedule_tick(t0() + Duration::seconds(60));

        let info = c.job_info(&job_id).unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.failure.unwrap().contains("sin workers"));
    }

    #[test]
    fn chunking_failure_creates_no_job() {
        let tmp = temp_dir("chunking");
        let huge = "x".repeat(4096);
        let path = write_log(
            &tmp,
            "app.log",
            &["INFO corto".to_string(), huge, "INFO fin".to_string()],
        );

        let mut cfg = config();
        cfg.max_record_bytes = 128;
        let mut c = Coordinator::new(cfg);
        let err = c.submit_jobs(&request(&path, 2), t0()).unwrap_err();
        assert!(matches!(err, CoordinatorError::Chunking(_)));
        assert!(c.list_jobs().is_empty());
    }

    #[test]
    fn missing_input_is_an_error() {
        let tmp = temp_dir("missing");
        let mut c = Coordinator::new(config());
        let err = c
            .submit_jobs(&request(&tmp.join("*.log"), 2), t0())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoInputFiles(_)));
    }

    #[test]
    fn glob_creates_one_job_per_file_and_empty_file_succeeds() {
        let tmp = temp_dir("glob");
        write_log(&tmp, "a.log", &four_chunk_log());
        fs::File::create(tmp.join("b.log")).unwrap();

        let mut c = Coordinator::new(config());
        let jobs = c.submit_jobs(&request(&tmp.join("*.log"), 2), t0()).unwrap();
        assert_eq!(jobs.len(), 2);

        let empty = jobs.iter().find(|j| j.input_path.ends_with("b.log")).unwrap();
        assert_eq!(empty.status, JobStatus::Succeeded);
        assert_eq!(empty.total_tasks, 0);
        let full = jobs.iter().find(|j| j.input_path.ends_with("a.log")).unwrap();
        assert_eq!(full.status, JobStatus::Accepted);
        assert_eq!(full.total_tasks, 2);
    }

    #[test]
    fn cancel_frees_workers_and_later_results_are_stale() {
        let tmp = temp_dir("cancel");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 2), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();

        let info = c.cancel_job(&job_id, t0()).unwrap();
        assert_eq!(info.status, JobStatus::Cancelled);
        assert!(c.registry.get("w").unwrap().is_idle());
        assert_eq!(c.submit_result(&run_worker(&a, "w"), t0()).unwrap(), SubmitOutcome::Stale);

        assert!(matches!(
            c.cancel_job("no-existe", t0()),
            Err(CoordinatorError::UnknownJob(_))
        ));
    }

    #[test]
    fn failure_report_requeues_with_next_generation() {
        let tmp = temp_dir("failure");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();

        let req = TaskFailureRequest {
            worker_id: "w".to_string(),
            job_id: job_id.clone(),
            task_id: a.task_id.clone(),
            generation: a.generation,
            reason: "disco ilegible".to_string(),
        };
        assert!(c.report_failure(&req, t0()).unwrap());
        // el mismo reporte otra vez ya es viejo
        assert!(!c.report_failure(&req, t0()).unwrap());

        let again = c.next_assignment("w", t0()).unwrap().unwrap();
        assert_eq!(again.task_id, a.task_id);
        assert_eq!(again.generation, 1);
        assert_eq!(c.registry.get("w").unwrap().tasks_failed, 1);
    }

    #[test]
    fn chunk_that_always_fails_fails_the_job() {
        let tmp = temp_dir("failure_cap");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(CoordinatorConfig {
            max_task_failures: 3,
            ..config()
        });
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());

        for attempt in 0..3u64 {
            let a = c.next_assignment("w", t0()).unwrap().unwrap();
            assert_eq!(a.generation, attempt);
            let req = TaskFailureRequest {
                worker_id: "w".to_string(),
                job_id: job_id.clone(),
                task_id: a.task_id.clone(),
                generation: a.generation,
                reason: "archivo borrado".to_string(),
            };
            // los dos primeros se reencolan, el tercero agota el tope
            assert_eq!(c.report_failure(&req, t0()).unwrap(), attempt < 2);
        }

        let info = c.job_info(&job_id).unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.reassignments, 2);
        assert!(info.failure.unwrap().contains("archivo borrado"));
        assert!(c.job_state(&job_id).is_none());

        // el worker queda libre y no recibe más tareas de ese job
        assert!(c.next_assignment("w", t0()).unwrap().is_none());
        assert_eq!(c.registry.get("w").unwrap().tasks_failed, 3);
    }

    #[test]
    fn heartbeat_loss_does_not_count_as_task_failure() {
        let tmp = temp_dir("failure_cap_heartbeat");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(CoordinatorConfig {
            max_task_failures: 1,
            ..config()
        });
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();

        // cuatro workers mueren uno tras otro con la tarea en mano
        let mut now = t0();
        for i in 0..4 {
            let w = format!("w{}", i);
            c.register_worker(&w, &w, now);
            c.next_assignment(&w, now).unwrap().unwrap();
            now = now + Duration::seconds(20);
            c.monitor_tick(now);
            now = now + Duration::seconds(20);
            c.monitor_tick(now);
        }

        let info = c.job_info(&job_id).unwrap();
        assert_eq!(info.status, JobStatus::Running);
        assert_eq!(info.reassignments, 4);
    }

    #[test]
    fn re_registered_worker_loses_its_task() {
        let tmp = temp_dir("re_register");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let job_id = c.submit_jobs(&request(&path, 1), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();

        c.register_worker("w", "w", t0() + Duration::seconds(3));
        let task = c.job_state(&job_id).unwrap().scheduler().task(&a.task_id).unwrap();
        assert_eq!(task.generation, 1);

        let b = c.next_assignment("w", t0() + Duration::seconds(3)).unwrap().unwrap();
        assert_eq!(b.generation, 1);
    }

    #[test]
    fn unknown_worker_cannot_poll_and_future_generation_is_rejected() {
        let tmp = temp_dir("unknown");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        c.submit_jobs(&request(&path, 1), t0()).unwrap();
        assert!(matches!(
            c.next_assignment("fantasma", t0()),
            Err(CoordinatorError::UnknownWorker(_))
        ));

        c.register_worker("w", "w", t0());
        let a = c.next_assignment("w", t0()).unwrap().unwrap();
        let mut r = run_worker(&a, "w");
        r.generation = 7;
        assert!(matches!(
            c.submit_result(&r, t0()),
            Err(CoordinatorError::FutureGeneration { .. })
        ));
    }

    #[test]
    fn accepted_results_publish_metrics_snapshots() {
        let tmp = temp_dir("snapshots");
        let path = write_log(&tmp, "app.log", &four_chunk_log());

        let mut c = Coordinator::new(config());
        let rx = c.subscribe();
        let job_id = c.submit_jobs(&request(&path, 2), t0()).unwrap()[0].id.clone();
        c.register_worker("w", "w", t0());

        let a = c.next_assignment("w", t0()).unwrap().unwrap();
        c.submit_result(&run_worker(&a, "w"), t0()).unwrap();

        let snap = rx.borrow().get(&job_id).cloned().unwrap();
        // 8 líneas en el mismo minuto, 2 errores
        let minute = snap.current_minute.unwrap();
        assert_eq!(minute.line_count, 8);
        assert!((snap.error_rate_per_minute - 0.25).abs() < 1e-9);
        assert!(snap.requests_per_second > 0.0);
    }
}
