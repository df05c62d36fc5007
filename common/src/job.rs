use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

pub type JobId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,

    /// Patrón de archivos de entrada, ej: "/data/logs/*.log".
    /// Se crea un job por cada archivo que haga match.
    pub input_glob: String,

    /// Cantidad de chunks deseada por archivo
    #[serde(default)]
    pub chunk_count: Option<u32>,

    /// Alternativa: tamaño objetivo de cada chunk en bytes
    #[serde(default)]
    pub chunk_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    /// Hay tareas pendientes pero ningún worker vivo
    Degraded,
    Failed,
    Succeeded,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,

    /// Archivo procesado por este job
    pub input_path: String,
    pub file_size: u64,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    /// Veces que alguna tarea se reasignó (generación +1)
    pub reassignments: u32,
    /// Motivo del fallo, si lo hay
    pub failure: Option<String>,
}
