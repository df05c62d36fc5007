use chrono::Duration;
use std::env;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 15;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_SCHEDULE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_TASK_TIMEOUT_SECS: i64 = 300;
pub const DEFAULT_NO_WORKERS_TIMEOUT_SECS: i64 = 120;
pub const DEFAULT_MAX_RECORD_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_COUNT: u32 = 8;
pub const DEFAULT_MAX_TASK_FAILURES: u32 = 3;
pub const DEFAULT_MINUTE_RETENTION: usize = 60;
pub const DEFAULT_SECOND_RETENTION: usize = 300;

/// Configuración del master. Todo sale de variables de entorno con
/// defaults razonables para correr en local.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: String,
    /// Sin heartbeat durante más que esto: Alive -> Suspected -> Dead
    pub heartbeat_timeout: Duration,
    pub monitor_interval_secs: u64,
    pub schedule_interval_ms: u64,
    /// Tarea en Assigned/InProgress más tiempo que esto se reasigna.
    /// `None` desactiva el chequeo.
    pub task_timeout: Option<Duration>,
    /// Tiempo máximo de un job sin workers vivos antes de marcarlo Failed
    pub no_workers_timeout: Duration,
    /// Fallos reportados por workers para una misma tarea antes de marcar
    /// el job Failed. La pérdida de heartbeat no cuenta.
    pub max_task_failures: u32,
    pub max_record_bytes: u64,
    pub default_chunk_count: u32,
    pub minute_retention: usize,
    pub second_retention: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            heartbeat_timeout: Duration::seconds(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            schedule_interval_ms: DEFAULT_SCHEDULE_INTERVAL_MS,
            task_timeout: Some(Duration::seconds(DEFAULT_TASK_TIMEOUT_SECS)),
            no_workers_timeout: Duration::seconds(DEFAULT_NO_WORKERS_TIMEOUT_SECS),
            max_task_failures: DEFAULT_MAX_TASK_FAILURES,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            default_chunk_count: DEFAULT_CHUNK_COUNT,
            minute_retention: DEFAULT_MINUTE_RETENTION,
            second_retention: DEFAULT_SECOND_RETENTION,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let task_timeout = match env_parse::<i64>("TASK_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::seconds(secs)),
            None => d.task_timeout,
        };

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or(d.bind_addr),
            heartbeat_timeout: env_parse::<i64>("HEARTBEAT_TIMEOUT_SECS")
                .map(Duration::seconds)
                .unwrap_or(d.heartbeat_timeout),
            monitor_interval_secs: env_parse("MONITOR_INTERVAL_SECS")
                .unwrap_or(d.monitor_interval_secs)
                .max(1),
            schedule_interval_ms: env_parse("SCHEDULE_INTERVAL_MS")
                .unwrap_or(d.schedule_interval_ms)
                .max(10),
            task_timeout,
            no_workers_timeout: env_parse::<i64>("NO_WORKERS_TIMEOUT_SECS")
                .map(Duration::seconds)
                .unwrap_or(d.no_workers_timeout),
            max_task_failures: env_parse("MAX_TASK_FAILURES")
                .unwrap_or(d.max_task_failures)
                .max(1),
            max_record_bytes: env_parse("MAX_RECORD_BYTES").unwrap_or(d.max_record_bytes),
            default_chunk_count: env_parse("DEFAULT_CHUNK_COUNT")
                .unwrap_or(d.default_chunk_count)
                .max(1),
            minute_retention: env_parse("MINUTE_RETENTION")
                .unwrap_or(d.minute_retention)
                .max(2),
            second_retention: env_parse("SECOND_RETENTION")
                .unwrap_or(d.second_retention)
                .max(2),
        }
    }
}
