use common::{CoordinatorError, PartialResult, SubmitOutcome, TaskId, Totals, WorkerId};
use std::collections::HashMap;
use tracing::debug;

/// Resultado aceptado para un chunk.
#[derive(Debug, Clone)]
pub struct AcceptedResult {
    pub generation: u64,
    pub worker_id: WorkerId,
}

/// Tabla de contabilidad por chunk + totales del job.
///
/// Cada chunk suma a los totales exactamente una vez: el primer resultado
/// de la generación actual. Los de generaciones viejas son stale y los
/// repetidos son no-op.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    accepted: HashMap<TaskId, AcceptedResult>,
    totals: Totals,
    stale: u64,
    duplicates: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `current_generation` es la generación actual de la tarea del resultado.
    pub fn merge(
        &mut self,
        current_generation: u64,
        result: &PartialResult,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        if result.generation < current_generation {
            self.stale += 1;
            debug!(
                "descartando resultado stale de {} (gen {} < {}) del worker {}",
                result.task_id, result.generation, current_generation, result.worker_id
            );
            return Ok(SubmitOutcome::Stale);
        }

        if result.generation > current_generation {
            return Err(CoordinatorError::FutureGeneration {
                task_id: result.task_id.clone(),
                got: result.generation,
                current: current_generation,
            });
        }

        if let Some(prev) = self.accepted.get(&result.task_id) {
            self.duplicates += 1;
            debug!(
                "resultado duplicado de {} (gen {}), ya aceptado del worker {}",
                result.task_id, prev.generation, prev.worker_id
            );
            return Ok(SubmitOutcome::Duplicate);
        }

        self.totals.add(result);
        self.accepted.insert(
            result.task_id.clone(),
            AcceptedResult {
                generation: result.generation,
                worker_id: result.worker_id.clone(),
            },
        );
        Ok(SubmitOutcome::Accepted)
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Generación aceptada de cada chunk.
    pub fn accepted_generations(&self) -> HashMap<TaskId, u64> {
        self.accepted
            .iter()
            .map(|(id, r)| (id.clone(), r.generation))
            .collect()
    }

    pub fn accepted(&self, task_id: &str) -> Option<&AcceptedResult> {
        self.accepted.get(task_id)
    }

    pub fn stale_count(&self) -> u64 {
        self.stale
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }
}
