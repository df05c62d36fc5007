use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};
use crate::task::TaskId;
use crate::worker::WorkerId;

/// Intervalo de timestamps de los registros de un chunk (ambos inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self { start: ts, end: ts }
    }

    pub fn extend(&mut self, ts: DateTime<Utc>) {
        if ts < self.start {
            self.start = ts;
        }
        if ts > self.end {
            self.end = ts;
        }
    }
}

/// Conteos de los registros de un mismo segundo (epoch) dentro de un chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondSample {
    pub second: i64,
    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
}

/// Resultado parcial de un worker para un chunk. Inmutable una vez enviado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub generation: u64,
    pub worker_id: WorkerId,

    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
    /// Líneas sin timestamp/nivel reconocible
    pub parse_error_count: u64,

    pub time_range: Option<TimeRange>,

    /// Granularidad por registro (agrupada por segundo). Si viene vacío el
    /// master reparte los conteos proporcionalmente sobre `time_range`.
    #[serde(default)]
    pub samples: Vec<SecondSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitOutcome {
    /// Primer resultado aceptado para el chunk en la generación actual
    Accepted,
    /// Ya había un resultado aceptado en esta generación (no-op)
    Duplicate,
    /// Generación vieja: el chunk fue reasignado
    Stale,
}

/// Totales acumulados de un job (suma de los resultados aceptados).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub chunks: u64,
    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
    pub parse_error_count: u64,
}

impl Totals {
    pub fn add(&mut self, r: &PartialResult) {
        self.chunks += 1;
        self.line_count += r.line_count;
        self.error_count += r.error_count;
        self.request_count += r.request_count;
        self.response_time_sum += r.response_time_sum;
        self.response_time_count += r.response_time_count;
        self.parse_error_count += r.parse_error_count;
    }

    /// error_count / max(line_count, 1)
    pub fn error_rate(&self) -> f64 {
        self.error_count as f64 / self.line_count.max(1) as f64
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        self.response_time_sum / self.response_time_count.max(1) as f64
    }
}

/// Métricas derivadas de un bucket de ventana.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub window_start: DateTime<Utc>,
    pub window_size_secs: u64,
    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub requests_per_second: f64,
}

/// Vista de solo lectura del MetricsEngine (getSnapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub as_of: DateTime<Utc>,
    /// Del último minuto completo (o el minuto en curso si no hay ninguno)
    pub error_rate_per_minute: f64,
    pub avg_response_time_ms: f64,
    /// Del último segundo completo (o el segundo en curso)
    pub requests_per_second: f64,

    pub current_minute: Option<WindowMetrics>,
    pub last_complete_minute: Option<WindowMetrics>,
    pub current_second: Option<WindowMetrics>,
    pub last_complete_second: Option<WindowMetrics>,
}

impl MetricsSnapshot {
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            error_rate_per_minute: 0.0,
            avg_response_time_ms: 0.0,
            requests_per_second: 0.0,
            current_minute: None,
            last_complete_minute: None,
            current_second: None,
            last_complete_second: None,
        }
    }
}

/// Resultado final (o parcial, si el job sigue corriendo) de un job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    pub totals: Totals,
    /// Tasas derivadas una sola vez a partir de los conteos globales
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub metrics: MetricsSnapshot,
}
