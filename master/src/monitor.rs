use chrono::{DateTime, Duration, Utc};
use common::{JobId, TaskId, WorkerId, WorkerStatus};
use tracing::warn;

use crate::registry::WorkerRegistry;

/// Evento que se emite cuando un worker pasa a Dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLost {
    pub worker_id: WorkerId,
    /// Tarea que tenía asignada en ese momento, si la había
    pub assignment: Option<(JobId, TaskId)>,
}

/// Detector de fallos por heartbeat.
///
/// Un scan es una función pura de `now`: no hay loop propio acá, el loop
/// vive en `failover.rs`.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Una pasada sobre el registro:
    /// - Alive con heartbeat viejo -> Suspected
    /// - Suspected con heartbeat viejo -> Dead (emite WorkerLost)
    pub fn scan(&self, registry: &mut WorkerRegistry, now: DateTime<Utc>) -> Vec<WorkerLost> {
        let mut to_suspect: Vec<WorkerId> = Vec::new();
        let mut to_kill: Vec<WorkerId> = Vec::new();

        for w in registry.iter() {
            let elapsed = now - w.last_heartbeat_at;
            if elapsed <= self.timeout {
                continue;
            }
            match w.status {
                WorkerStatus::Alive => to_suspect.push(w.worker_id.clone()),
                WorkerStatus::Suspected => to_kill.push(w.worker_id.clone()),
                WorkerStatus::Dead => {}
            }
        }

        for id in to_suspect {
            warn!("worker {} sin heartbeat: Alive -> Suspected", id);
            registry.mark_suspected(&id);
        }

        to_kill
            .into_iter()
            .map(|id| {
                warn!("worker {} sigue sin heartbeat: Suspected -> Dead", id);
                let assignment = registry.mark_dead(&id);
                WorkerLost {
                    worker_id: id,
                    assignment,
                }
            })
            .collect()
    }
}
