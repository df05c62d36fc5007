use std::{env, time::Duration};

pub const DEFAULT_MASTER_URL: &str = "http://localhost:8080";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SUBMIT_MAX_RETRIES: u32 = 5;

/// Configuración del worker.
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_url: String,
    /// Id estable mientras viva el proceso (hostname-xxxxxxxx por defecto)
    pub worker_id: String,
    pub address: String,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub submit_max_retries: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "worker".to_string())
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let host = host_name();
        let worker_id = env::var("WORKER_ID").unwrap_or_else(|_| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", host, &suffix[..8])
        });

        Self {
            master_url: env::var("MASTER_URL")
                .unwrap_or_else(|_| DEFAULT_MASTER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            worker_id,
            address: env::var("WORKER_ADDRESS").unwrap_or(host),
            heartbeat_interval: Duration::from_secs(
                env_parse("HEARTBEAT_INTERVAL_SECS")
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS)
                    .max(1),
            ),
            poll_interval: Duration::from_millis(
                env_parse("POLL_INTERVAL_MS")
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                    .max(50),
            ),
            submit_max_retries: env_parse("SUBMIT_MAX_RETRIES").unwrap_or(DEFAULT_SUBMIT_MAX_RETRIES),
        }
    }

    /// Intervalo efectivo de heartbeat: nunca más de un tercio del timeout
    /// del master, así un heartbeat perdido no alcanza para declararnos muertos.
    pub fn heartbeat_every(&self, master_timeout_secs: u64) -> Duration {
        let cap = Duration::from_millis(master_timeout_secs.max(1) * 1000 / 3);
        self.heartbeat_interval.min(cap).max(Duration::from_millis(100))
    }
}
