use chrono::{DateTime, Duration, Utc};
use common::{
    Chunk, CoordinatorError, JobId, SchedulerError, Task, TaskAssignment, TaskId, TaskState,
    WorkerId,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Vista de un worker Alive para la pasada de asignación.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker_id: WorkerId,
    /// Ya tiene una tarea (de este job o de otro)
    pub busy: bool,
    /// Tareas asignadas en total; se prefiere el menos cargado
    pub load: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub task: TaskAssignment,
}

/// Máquina de estados de las tareas de un job (una tarea por chunk).
///
/// Pending -> Assigned -> InProgress -> Completed
/// Assigned/InProgress -> Reassigning -> Pending (generation += 1)
#[derive(Debug)]
pub struct TaskScheduler {
    job_id: JobId,
    // índice = índice del chunk
    tasks: Vec<Task>,
    by_id: HashMap<TaskId, usize>,
    pending: VecDeque<usize>,
    rr_cursor: usize,
    reassignments: u32,
}

impl TaskScheduler {
    pub fn new(job_id: &str, chunks: Vec<Chunk>, now: DateTime<Utc>) -> Self {
        let tasks: Vec<Task> = chunks
            .into_iter()
            .map(|c| Task::new(job_id, c, now))
            .collect();
        let by_id = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let pending = (0..tasks.len()).collect();

        Self {
            job_id: job_id.to_string(),
            tasks,
            by_id,
            pending,
            rr_cursor: 0,
            reassignments: 0,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.by_id.get(task_id).map(|i| &self.tasks[*i])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn completed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Completed)
            .count()
    }

    pub fn reassignments(&self) -> u32 {
        self.reassignments
    }

    /// Todos los chunks tienen su tarea Completed en la generación actual.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Completed)
    }

    /// Hay tareas esperando worker (Pending o Reassigning).
    pub fn has_waiting(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.state, TaskState::Pending | TaskState::Reassigning))
    }

    fn index_of(&self, task_id: &str) -> Result<usize, CoordinatorError> {
        self.by_id
            .get(task_id)
            .copied()
            .ok_or_else(|| CoordinatorError::UnknownTask(task_id.to_string()))
    }

    fn transition(&mut self, idx: usize, to: TaskState) -> Result<(), CoordinatorError> {
        let task = &mut self.tasks[idx];
        if !task.state.can_transition_to(to) {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.state,
                to,
            });
        }
        task.state = to;
        Ok(())
    }

    /// Reassigning -> Pending. Las reasignadas van al frente de la cola.
    fn promote_reassigning(&mut self) {
        let mut promoted: Vec<usize> = Vec::new();
        for (i, t) in self.tasks.iter_mut().enumerate() {
            if t.state == TaskState::Reassigning {
                t.state = TaskState::Pending;
                promoted.push(i);
            }
        }
        for i in promoted.into_iter().rev() {
            self.pending.push_front(i);
        }
    }

    /// Elige el worker libre menos cargado; empates por round-robin.
    ///
    /// `Ok(None)` si hay workers vivos pero todos ocupados.
    fn pick_worker(&mut self, slots: &[WorkerSlot]) -> Result<Option<usize>, SchedulerError> {
        if slots.is_empty() {
            return Err(SchedulerError::NoWorkersAvailable);
        }

        let Some(min_load) = slots.iter().filter(|s| !s.busy).map(|s| s.load).min() else {
            return Ok(None);
        };

        let n = slots.len();
        let chosen = (0..n)
            .map(|k| (self.rr_cursor + k) % n)
            .find(|&i| !slots[i].busy && slots[i].load == min_load);

        if let Some(i) = chosen {
            self.rr_cursor = (i + 1) % n;
        }
        Ok(chosen)
    }

    /// Pasada de asignación: reparte tareas Pending entre los workers libres.
    ///
    /// Marca como `busy` los slots que usa, así el mismo vector puede
    /// pasarse a los demás jobs en el mismo tick.
    pub fn schedule(
        &mut self,
        slots: &mut [WorkerSlot],
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        self.promote_reassigning();

        let mut out = Vec::new();
        while let Some(&idx) = self.pending.front() {
            if self.tasks[idx].state != TaskState::Pending {
                // quedó en la cola una entrada vieja
                self.pending.pop_front();
                continue;
            }

            let Some(slot_idx) = self.pick_worker(slots)? else {
                debug!("job {}: todos los workers ocupados", self.job_id);
                break;
            };
            self.pending.pop_front();

            let slot = &mut slots[slot_idx];
            slot.busy = true;
            slot.load += 1;

            let task = &mut self.tasks[idx];
            task.state = TaskState::Assigned;
            task.assigned_worker = Some(slot.worker_id.clone());
            task.assigned_at = Some(now);

            info!(
                "asignando tarea {} (gen={}, bytes {}..{}) al worker {}",
                task.id, task.generation, task.chunk.start_offset, task.chunk.end_offset, slot.worker_id
            );

            out.push(Assignment {
                worker_id: slot.worker_id.clone(),
                task: assignment_of(task),
            });
        }

        Ok(out)
    }

    /// El worker recibió la tarea: Assigned -> InProgress.
    pub fn start(&mut self, task_id: &str, worker_id: &str) -> Result<TaskAssignment, CoordinatorError> {
        let idx = self.index_of(task_id)?;
        if self.tasks[idx].assigned_worker.as_deref() != Some(worker_id) {
            return Err(CoordinatorError::UnknownWorker(worker_id.to_string()));
        }
        if self.tasks[idx].state == TaskState::Assigned {
            self.transition(idx, TaskState::InProgress)?;
        }
        Ok(assignment_of(&self.tasks[idx]))
    }

    /// Marca la tarea como Completed. La generación tiene que ser la actual.
    pub fn complete(&mut self, task_id: &str, generation: u64) -> Result<(), CoordinatorError> {
        let idx = self.index_of(task_id)?;
        let current = self.tasks[idx].generation;
        if generation != current {
            return Err(CoordinatorError::GenerationMismatch {
                task_id: task_id.to_string(),
                got: generation,
                current,
            });
        }
        self.transition(idx, TaskState::Completed)
    }

    /// Assigned/InProgress -> Reassigning con generation + 1.
    /// Devuelve la nueva generación.
    pub fn reassign(&mut self, task_id: &str, reason: &str) -> Result<u64, CoordinatorError> {
        let idx = self.index_of(task_id)?;
        self.transition(idx, TaskState::Reassigning)?;

        let task = &mut self.tasks[idx];
        let previous_worker = task.assigned_worker.take();
        task.assigned_at = None;
        task.generation += 1;
        self.reassignments += 1;

        info!(
            "reasignando tarea {} (worker anterior {:?}): {} -> generación {}",
            task.id, previous_worker, reason, task.generation
        );
        Ok(task.generation)
    }

    /// WorkerLost: reasigna todas las tareas activas de ese worker.
    pub fn on_worker_lost(&mut self, worker_id: &str) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.state.is_active() && t.assigned_worker.as_deref() == Some(worker_id))
            .map(|t| t.id.clone())
            .collect();

        ids.into_iter()
            .filter(|id| self.reassign(id, "worker perdido").is_ok())
            .collect()
    }

    /// Tareas activas hace más de `timeout` (worker vivo pero trabado).
    pub fn expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<(TaskId, WorkerId)> {
        self.tasks
            .iter()
            .filter(|t| t.state.is_active())
            .filter_map(|t| {
                let since = t.assigned_at?;
                let worker = t.assigned_worker.clone()?;
                (now - since > timeout).then(|| (t.id.clone(), worker))
            })
            .collect()
    }
}

fn assignment_of(task: &Task) -> TaskAssignment {
    TaskAssignment {
        job_id: task.job_id.clone(),
        task_id: task.id.clone(),
        chunk: task.chunk.clone(),
        generation: task.generation,
    }
}
