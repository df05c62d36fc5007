// master/src/state.rs

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, SnapshotMap};

#[derive(Clone)]
pub struct AppState {
    // único escritor: handlers y loops toman este lock y aplican un evento entero
    pub coordinator: Arc<Mutex<Coordinator>>,
    // lectura de métricas sin pasar por el lock
    pub snapshots: watch::Receiver<SnapshotMap>,
}

impl AppState {
    pub fn new(config: CoordinatorConfig) -> Self {
        let coordinator = Coordinator::new(config);
        let snapshots = coordinator.subscribe();
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
            snapshots,
        }
    }
}
