// master/src/registry.rs

use chrono::{DateTime, Utc};
use common::{CoordinatorError, JobId, TaskId, WorkerId, WorkerMetrics, WorkerStatus};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub address: String,
    pub status: WorkerStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Tarea asignada ahora mismo (como mucho una por worker)
    pub current_task_id: Option<TaskId>,
    pub current_job_id: Option<JobId>,

    // Métricas
    pub tasks_assigned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub cpu_percent: Option<f32>,
    pub mem_bytes: Option<u64>,
}

impl WorkerRecord {
    fn new(worker_id: &str, address: &str, now: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            address: address.to_string(),
            status: WorkerStatus::Alive,
            last_heartbeat_at: now,
            registered_at: now,
            current_task_id: None,
            current_job_id: None,
            tasks_assigned: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            cpu_percent: None,
            mem_bytes: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_task_id.is_none()
    }

    pub fn to_metrics(&self, now: DateTime<Utc>) -> WorkerMetrics {
        WorkerMetrics {
            worker_id: self.worker_id.clone(),
            address: self.address.clone(),
            status: self.status,
            last_heartbeat_secs_ago: (now - self.last_heartbeat_at).num_seconds(),
            current_task_id: self.current_task_id.clone(),
            tasks_assigned: self.tasks_assigned,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            cpu_percent: self.cpu_percent,
            mem_bytes: self.mem_bytes,
        }
    }
}

/// Qué pasó al recibir un heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Known,
    /// Id desconocido: se registró implícitamente
    Registered,
    /// Estaba Suspected o Dead y vuelve a Alive
    Revived(WorkerStatus),
}

/// Registro de workers conocidos. Un worker que no está acá no puede
/// recibir tareas.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
    // orden de registro, para que el round-robin sea determinista
    order: Vec<WorkerId>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (o re-registra) un worker. Si ya existía y tenía una tarea
    /// asignada, la devuelve: el proceso se reinició y esa tarea se perdió.
    pub fn register(
        &mut self,
        worker_id: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Option<(JobId, TaskId)> {
        match self.workers.get_mut(worker_id) {
            Some(meta) => {
                meta.address = address.to_string();
                meta.status = WorkerStatus::Alive;
                meta.last_heartbeat_at = now;
                info!("worker {} re-registrado ({})", worker_id, address);
                let job = meta.current_job_id.take();
                let task = meta.current_task_id.take();
                job.zip(task)
            }
            None => {
                self.workers
                    .insert(worker_id.to_string(), WorkerRecord::new(worker_id, address, now));
                self.order.push(worker_id.to_string());
                info!("worker registrado: {} ({})", worker_id, address);
                None
            }
        }
    }

    pub fn record_heartbeat(&mut self, worker_id: &str, now: DateTime<Utc>) -> HeartbeatOutcome {
        let Some(meta) = self.workers.get_mut(worker_id) else {
            self.register(worker_id, "", now);
            return HeartbeatOutcome::Registered;
        };

        if now > meta.last_heartbeat_at {
            meta.last_heartbeat_at = now;
        }

        match meta.status {
            WorkerStatus::Alive => HeartbeatOutcome::Known,
            previous => {
                meta.status = WorkerStatus::Alive;
                info!("worker {} vuelve a Alive (estaba {:?})", worker_id, previous);
                HeartbeatOutcome::Revived(previous)
            }
        }
    }

    pub fn record_stats(&mut self, worker_id: &str, cpu_percent: Option<f32>, mem_bytes: Option<u64>) {
        if let Some(meta) = self.workers.get_mut(worker_id) {
            meta.cpu_percent = cpu_percent;
            meta.mem_bytes = mem_bytes;
        }
    }

    pub fn mark_suspected(&mut self, worker_id: &str) {
        if let Some(meta) = self.workers.get_mut(worker_id) {
            if meta.status == WorkerStatus::Alive {
                meta.status = WorkerStatus::Suspected;
            }
        }
    }

    /// Marca el worker como Dead y devuelve la tarea que tenía asignada.
    pub fn mark_dead(&mut self, worker_id: &str) -> Option<(JobId, TaskId)> {
        let meta = self.workers.get_mut(worker_id)?;
        meta.status = WorkerStatus::Dead;
        let job = meta.current_job_id.take();
        let task = meta.current_task_id.take();
        job.zip(task)
    }

    /// Workers en estado Alive, en orden de registro.
    pub fn list_alive(&self) -> Vec<&WorkerRecord> {
        self.order
            .iter()
            .filter_map(|id| self.workers.get(id))
            .filter(|w| w.status == WorkerStatus::Alive)
            .collect()
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.order.iter().filter_map(|id| self.workers.get(id))
    }

    /// Anota la asignación. Sólo workers registrados y Alive pueden recibir tareas.
    pub fn assign(&mut self, worker_id: &str, job_id: &str, task_id: &str) -> Result<(), CoordinatorError> {
        let meta = self
            .workers
            .get_mut(worker_id)
            .filter(|m| m.status == WorkerStatus::Alive)
            .ok_or_else(|| CoordinatorError::UnknownWorker(worker_id.to_string()))?;

        meta.current_job_id = Some(job_id.to_string());
        meta.current_task_id = Some(task_id.to_string());
        meta.tasks_assigned += 1;
        Ok(())
    }

    /// Libera la tarea del worker si sigue siendo la suya.
    pub fn release(&mut self, worker_id: &str, task_id: &str, succeeded: bool) {
        if let Some(meta) = self.workers.get_mut(worker_id) {
            if meta.current_task_id.as_deref() == Some(task_id) {
                meta.current_task_id = None;
                meta.current_job_id = None;
            }
            if succeeded {
                meta.tasks_completed += 1;
            } else {
                meta.tasks_failed += 1;
            }
        }
    }

    /// Libera cualquier worker que tenga asignada una tarea de `job_id`.
    pub fn release_job(&mut self, job_id: &str) {
        for meta in self.workers.values_mut() {
            if meta.current_job_id.as_deref() == Some(job_id) {
                meta.current_job_id = None;
                meta.current_task_id = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn register_and_list_alive_in_registration_order() {
        let mut r = WorkerRegistry::new();
        r.register("w2", "10.0.0.2:9000", t0());
        r.register("w1", "10.0.0.1:9000", t0());

        let alive: Vec<&str> = r.list_alive().iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(alive, vec!["w2", "w1"]);
    }

    #[test]
    fn heartbeat_from_unknown_worker_registers_it() {
        let mut r = WorkerRegistry::new();
        assert_eq!(r.record_heartbeat("nuevo", t0()), HeartbeatOutcome::Registered);
        assert_eq!(r.len(), 1);
        assert_eq!(r.get("nuevo").unwrap().status, WorkerStatus::Alive);
        assert_eq!(r.record_heartbeat("nuevo", t0()), HeartbeatOutcome::Known);
    }

    #[test]
    fn heartbeat_revives_suspected_and_dead_workers() {
        let mut r = WorkerRegistry::new();
        r.register("w", "a", t0());
        r.mark_suspected("w");
        assert_eq!(
            r.record_heartbeat("w", t0() + Duration::seconds(1)),
            HeartbeatOutcome::Revived(WorkerStatus::Suspected)
        );

        r.mark_dead("w");
        assert!(r.list_alive().is_empty());
        assert_eq!(
            r.record_heartbeat("w", t0() + Duration::seconds(2)),
            HeartbeatOutcome::Revived(WorkerStatus::Dead)
        );
        assert_eq!(r.list_alive().len(), 1);
    }

    #[test]
    fn unknown_or_dead_workers_cannot_be_assigned() {
        let mut r = WorkerRegistry::new();
        assert!(r.assign("fantasma", "j", "j-0").is_err());

        r.register("w", "a", t0());
        r.mark_dead("w");
        assert!(r.assign("w", "j", "j-0").is_err());
    }

    #[test]
    fn mark_dead_returns_current_assignment() {
        let mut r = WorkerRegistry::new();
        r.register("w", "a", t0());
        r.assign("w", "j", "j-1").unwrap();
        assert!(!r.get("w").unwrap().is_idle());

        let lost = r.mark_dead("w");
        assert_eq!(lost, Some(("j".to_string(), "j-1".to_string())));
        assert!(r.get("w").unwrap().is_idle());
    }

    #[test]
    fn release_only_clears_matching_task() {
        let mut r = WorkerRegistry::new();
        r.register("w", "a", t0());
        r.assign("w", "j", "j-2").unwrap();

        r.release("w", "j-1", false);
        assert_eq!(r.get("w").unwrap().current_task_id.as_deref(), Some("j-2"));

        r.release("w", "j-2", true);
        let w = r.get("w").unwrap();
        assert!(w.is_idle());
        assert_eq!(w.tasks_completed, 1);
        assert_eq!(w.tasks_failed, 1);
    }

    #[test]
    fn re_register_returns_lost_assignment() {
        let mut r = WorkerRegistry::new();
        r.register("w", "a", t0());
        r.assign("w", "j", "j-0").unwrap();

        let lost = r.register("w", "b", t0() + Duration::seconds(30));
        assert_eq!(lost, Some(("j".to_string(), "j-0".to_string())));
        assert_eq!(r.get("w").unwrap().address, "b");
        assert_eq!(r.len(), 1);
    }
}
