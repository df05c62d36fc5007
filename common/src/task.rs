use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::worker::WorkerId;

pub type TaskId = String;

/// Rango de bytes `[start_offset, end_offset)` de un archivo de log.
///
/// `start_offset` es 0 o el byte siguiente a un '\n'; `end_offset` es EOF
/// o el byte siguiente a un '\n'. Nunca contiene un registro partido.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Ruta del archivo (compartida entre master y workers)
    pub file_id: String,
    /// Posición del chunk dentro del archivo
    pub index: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Assigned,
    InProgress,
    Reassigning,
    Completed,
}

impl TaskState {
    /// Transiciones permitidas de la máquina de estados de tareas.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Completed)
                | (InProgress, Completed)
                | (Assigned, Reassigning)
                | (InProgress, Reassigning)
                | (Reassigning, Pending)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub chunk: Chunk,
    /// Se incrementa en cada reasignación; nunca retrocede.
    pub generation: u64,
    pub state: TaskState,
    pub assigned_worker: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    /// Momento de la última asignación (para el timeout de ejecución)
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: &str, chunk: Chunk, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", job_id, chunk.index),
            job_id: job_id.to_string(),
            chunk,
            generation: 0,
            state: TaskState::Pending,
            assigned_worker: None,
            created_at: now,
            assigned_at: None,
        }
    }
}

/// Lo que el coordinador le entrega a un worker (assignTask).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub chunk: Chunk,
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_transitions_follow_state_machine() {
        use TaskState::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Reassigning));
        assert!(Reassigning.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Reassigning));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Reassigning.can_transition_to(Assigned));
    }

    #[test]
    fn task_id_is_derived_from_job_and_chunk_index() {
        let chunk = Chunk {
            file_id: "/data/app.log".to_string(),
            index: 3,
            start_offset: 10,
            end_offset: 20,
        };
        let t = Task::new("job-a", chunk, Utc::now());
        assert_eq!(t.id, "job-a-3");
        assert_eq!(t.generation, 0);
        assert_eq!(t.state, TaskState::Pending);
        assert_eq!(t.chunk.len(), 10);
    }

    #[test]
    fn wire_format_uses_screaming_snake_case_states() {
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        let a: TaskAssignment = serde_json::from_value(serde_json::json!({
            "job_id": "j",
            "task_id": "j-0",
            "chunk": { "file_id": "/data/app.log", "index": 0, "start_offset": 0, "end_offset": 42 },
            "generation": 2
        }))
        .unwrap();
        assert_eq!(a.generation, 2);
        assert_eq!(a.chunk.len(), 42);
    }
}
