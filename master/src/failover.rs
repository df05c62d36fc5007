use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Loop del detector de fallos: cada `every` corre un scan de heartbeats
/// y de tareas trabadas.
pub async fn run_monitor_loop(state: AppState, every: Duration) {
    loop {
        sleep(every).await;

        let Ok(mut coordinator) = state.coordinator.lock() else {
            warn!("lock del coordinador envenenado, monitor detenido");
            return;
        };
        let lost = coordinator.monitor_tick(Utc::now());
        drop(coordinator);

        for event in lost {
            match event.assignment {
                Some((job_id, task_id)) => info!(
                    "worker {} perdido con la tarea {} del job {}",
                    event.worker_id, task_id, job_id
                ),
                None => info!("worker {} perdido (sin tarea asignada)", event.worker_id),
            }
        }
    }
}

/// Loop de asignación: reparte tareas Pending entre los workers Alive.
pub async fn run_schedule_loop(state: AppState, every: Duration) {
    loop {
        sleep(every).await;

        let Ok(mut coordinator) = state.coordinator.lock() else {
            warn!("lock del coordinador envenenado, scheduler detenido");
            return;
        };
        let assigned = coordinator.schedule_tick(Utc::now());
        if !assigned.is_empty() {
            debug!("tick de scheduling: {} tarea(s) asignadas", assigned.len());
        }
    }
}
