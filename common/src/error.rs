//! Tipos de error compartidos entre master y worker.

use thiserror::Error;

use crate::job::JobId;
use crate::task::{TaskId, TaskState};
use crate::worker::WorkerId;

/// Errores al planear los chunks de un archivo.
///
/// Cualquiera de estos es fatal para el job: no se crea un job con
/// fronteras incorrectas.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// Un registro no termina dentro de la ventana de escaneo.
    #[error("registro demasiado grande en el offset {offset}: no hay salto de línea en {guard} bytes")]
    RecordTooLarge { offset: u64, guard: u64 },

    /// Parámetros de planificación inválidos (chunk_count = 0, etc.)
    #[error("parámetros de chunking inválidos: {0}")]
    InvalidTarget(String),

    #[error("error de I/O al planear chunks: {0}")]
    Io(#[from] std::io::Error),
}

/// Errores de la máquina de estados del coordinador.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("job desconocido: {0}")]
    UnknownJob(JobId),

    #[error("tarea desconocida: {0}")]
    UnknownTask(TaskId),

    #[error("worker desconocido: {0}")]
    UnknownWorker(WorkerId),

    /// Un resultado con una generación que el coordinador nunca emitió.
    #[error("tarea {task_id}: generación {got} mayor que la actual {current}")]
    FutureGeneration {
        task_id: TaskId,
        got: u64,
        current: u64,
    },

    #[error("tarea {task_id}: generación {got} distinta de la actual {current}")]
    GenerationMismatch {
        task_id: TaskId,
        got: u64,
        current: u64,
    },

    #[error("tarea {task_id}: transición inválida {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("ningún archivo coincide con '{0}'")]
    NoInputFiles(String),

    #[error("patrón de entrada inválido: {0}")]
    InvalidGlob(String),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),
}

/// Errores de la pasada de asignación.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// No hay ningún worker Alive; las tareas quedan Pending hasta el próximo tick.
    #[error("no hay workers disponibles")]
    NoWorkersAvailable,
}
