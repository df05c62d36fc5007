use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{JobInfo, JobRequest, JobResults, MetricsSnapshot, WindowMetrics, WorkerMetrics};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::env;

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el master de agregación de logs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Envía un job por cada archivo que haga match con el patrón
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        /// Patrón de archivos, ej: "/data/logs/*.log"
        #[arg(value_name = "INPUT_GLOB")]
        input_glob: String,

        /// Cantidad de chunks por archivo
        #[arg(long, conflicts_with = "chunk_size")]
        chunks: Option<u32>,

        /// Tamaño objetivo de cada chunk en bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// Lista todos los jobs
    Jobs,
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Totales agregados de un job
    Results {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Métricas por ventana (minuto / segundo)
    Metrics {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Cancela un job en curso
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    Workers,
}

async fn read_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("error consultando {} (status {}): {}", what, status, body);
    }
    Ok(resp.json().await?)
}

fn progress(job: &JobInfo) -> String {
    if job.total_tasks == 0 {
        return "(sin tareas)".to_string();
    }
    let pct = job.completed_tasks as f64 / job.total_tasks as f64 * 100.0;
    format!("{}/{} ({:.1}%)", job.completed_tasks, job.total_tasks, pct)
}

fn print_job(job: &JobInfo) {
    println!("Job {}", job.id);
    println!("  nombre        : {}", job.name);
    println!("  estado        : {:?}", job.status);
    println!("  archivo       : {} ({} bytes)", job.input_path, job.file_size);
    println!("  tareas        : {}", progress(job));
    println!("  reasignaciones: {}", job.reassignments);
    println!("  submitted_at  : {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  iniciado      : {}", started);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado    : {}", done);
    }
    if let Some(ref why) = job.failure {
        println!("  fallo         : {}", why);
    }
}

fn window_line(label: &str, w: &Option<WindowMetrics>) -> String {
    match w {
        Some(w) => format!(
            "{} {} -> líneas={} errores={} ({:.2}%) latencia={:.1}ms rps={:.2}",
            label,
            w.window_start,
            w.line_count,
            w.error_count,
            w.error_rate * 100.0,
            w.avg_response_time_ms,
            w.requests_per_second
        ),
        None => format!("{} (sin datos)", label),
    }
}

fn print_metrics(m: &MetricsSnapshot) {
    println!("Métricas al {}", m.as_of);
    println!("  error rate / minuto : {:.2}%", m.error_rate_per_minute * 100.0);
    println!("  latencia promedio   : {:.1} ms", m.avg_response_time_ms);
    println!("  requests / segundo  : {:.2}", m.requests_per_second);
    println!("  {}", window_line("minuto actual      :", &m.current_minute));
    println!("  {}", window_line("último minuto      :", &m.last_complete_minute));
    println!("  {}", window_line("segundo actual     :", &m.current_second));
    println!("  {}", window_line("último segundo     :", &m.last_complete_second));
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Submit {
            name,
            input_glob,
            chunks,
            chunk_size,
        } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let req = JobRequest {
                name,
                input_glob,
                chunk_count: chunks,
                chunk_size_bytes: chunk_size,
            };
            let resp = client.post(&url).json(&req).send().await?;
            let jobs: Vec<JobInfo> = read_json(resp, "/api/v1/jobs").await?;

            println!("{} job(s) creados:", jobs.len());
            for job in &jobs {
                print_job(job);
            }
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let jobs: Vec<JobInfo> = read_json(client.get(&url).send().await?, "/api/v1/jobs").await?;
            if jobs.is_empty() {
                println!("No hay jobs.");
            }
            for job in jobs {
                println!(
                    "{}  {:<10} {:<12} {}",
                    job.id,
                    format!("{:?}", job.status),
                    progress(&job),
                    job.input_path
                );
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let job: JobInfo = read_json(client.get(&url).send().await?, "el job").await?;
            print_job(&job);
        }

        Commands::Results { id } => {
            let url = format!("{}/api/v1/jobs/{id}/results", base_url);
            let results: JobResults = read_json(client.get(&url).send().await?, "resultados").await?;
            let t = &results.totals;
            println!("Resultados para job {} ({:?}):", results.job_id, results.status);
            println!("  chunks         : {}", t.chunks);
            println!("  líneas         : {}", t.line_count);
            println!("  errores        : {}", t.error_count);
            println!("  requests       : {}", t.request_count);
            println!("  no parseables  : {}", t.parse_error_count);
            println!("  error rate     : {:.2}%", results.error_rate * 100.0);
            println!("  latencia prom. : {:.1} ms", results.avg_response_time_ms);
            println!();
            print_metrics(&results.metrics);
        }

        Commands::Metrics { id } => {
            let url = format!("{}/api/v1/jobs/{id}/metrics", base_url);
            let snapshot: MetricsSnapshot = read_json(client.get(&url).send().await?, "métricas").await?;
            print_metrics(&snapshot);
        }

        Commands::Cancel { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let job: JobInfo = read_json(client.delete(&url).send().await?, "el job").await?;
            println!("Job {} -> {:?}", job.id, job.status);
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let workers: Vec<WorkerMetrics> = read_json(client.get(&url).send().await?, "/api/v1/workers").await?;
            if workers.is_empty() {
                println!("No hay workers registrados.");
            }
            for w in workers {
                println!("Worker {}", w.worker_id);
                println!("  dirección      : {}", w.address);
                println!("  estado         : {:?}", w.status);
                println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                println!(
                    "  tarea actual   : {}",
                    w.current_task_id.as_deref().unwrap_or("(ninguna)")
                );
                println!(
                    "  tareas         : asignadas={}, ok={}, fallidas={}",
                    w.tasks_assigned, w.tasks_completed, w.tasks_failed
                );
                match w.cpu_percent {
                    Some(cpu) => println!("  cpu_percent    : {:.1}%", cpu),
                    None => println!("  cpu_percent    : (sin datos)"),
                }
                match w.mem_bytes {
                    Some(mem) => println!("  mem_bytes      : {}", mem),
                    None => println!("  mem_bytes      : (sin datos)"),
                }
                println!();
            }
        }
    }

    Ok(())
}
