//! jobgate CLI — operator interface to the work server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use jobgate::config::Config;
use jobgate::crypto;
use jobgate::event::{Event, HandlerParams, Hook};
use jobgate::telemetry::work::start_worker_span;
use jobgate::telemetry::{TelemetryConfig, init_telemetry};
use jobgate::{WorkServer, WorkerClient};
use serde::{Deserialize, Serialize};
use tracing::{Instrument as _, info, warn};

#[derive(Parser)]
#[command(name = "jobgate", about = "Hand work to anonymous workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a fresh shared secret (base64) for JOBGATE_SECRET
    Keygen,
    /// Run server and workers in process and push jobs through the protocol
    Demo {
        /// Number of workers to register
        #[arg(long, default_value_t = 3)]
        workers: usize,
        /// Number of jobs to enqueue
        #[arg(long, default_value_t = 10)]
        jobs: usize,
        /// Per-job timeout in seconds (defaults to JOBGATE_DEFAULT_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
        /// Pause between jobs on each worker, in milliseconds
        #[arg(long, default_value_t = 20)]
        pause_ms: u64,
    },
}

/// Payload used by the demo.
#[derive(Debug, Serialize, Deserialize)]
struct SumJob {
    job: usize,
    numbers: Vec<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Keygen => {
            println!("{}", crypto::encode_secret(&crypto::generate_secret()));
            Ok(())
        }
        Command::Demo {
            workers,
            jobs,
            timeout,
            pause_ms,
        } => cmd_demo(workers, jobs, timeout, Duration::from_millis(pause_ms)).await,
    }
}

async fn cmd_demo(
    workers: usize,
    jobs: usize,
    timeout: Option<u64>,
    pause: Duration,
) -> anyhow::Result<()> {
    // Without JOBGATE_SECRET the demo generates a secret of its own.
    let config = Config::from_env_if_present()?;

    let guard = init_telemetry(
        config
            .as_ref()
            .map_or_else(TelemetryConfig::default, TelemetryConfig::from_config),
    )?;

    let secret = match &config {
        Some(config) => config.secret_bytes(),
        None => crypto::generate_secret().to_vec(),
    };
    let timeout_secs = timeout
        .or_else(|| config.as_ref().map(|c| c.default_timeout.as_secs()))
        .unwrap_or(60);

    let server = WorkServer::new(&secret)?;

    let mut params = HandlerParams::new();
    params.insert("run".to_string(), serde_json::json!("demo"));
    server.add_params(params);

    server.new_handler(Hook::WorkComplete, |event: &Event, params: &HandlerParams| {
        if let Some(work) = event.as_work() {
            info!(
                run = ?params.get("run"),
                work_id = %work.id,
                result = %work.result.payload,
                "job finished"
            );
        }
    })?;
    server.new_handler(Hook::WorkTimeout, |event: &Event, _: &HandlerParams| {
        if let Some(work) = event.as_work() {
            warn!(work_id = %work.id, "job timed out");
        }
    })?;
    server.new_handler(Hook::WorkerVerify, |event: &Event, _: &HandlerParams| {
        if let Some(worker) = event.as_worker() {
            info!(worker_id = %worker.id, "worker joined");
        }
    })?;

    for job in 0..jobs {
        let payload = SumJob {
            job,
            numbers: (0..=job as u64).collect(),
        };
        server.submit_work(&payload, timeout_secs)?;
    }
    info!(queued = server.queue_size(), "jobs enqueued");

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let server = server.clone();
        let secret = secret.clone();
        let (id, challenge) = server.register_worker();
        let span = start_worker_span(&id);
        let worker = run_worker(server, secret, id, challenge, pause);
        handles.push(tokio::spawn(worker.instrument(span)));
    }

    let mut completed = 0;
    for handle in handles {
        completed += handle.await??;
    }

    println!(
        "{completed} job(s) completed by {} worker(s), {} left in queue",
        server.worker_count(),
        server.queue_size()
    );
    guard.force_flush();
    Ok(())
}

/// Verify, then fetch and complete until the queue runs dry.
async fn run_worker(
    server: WorkServer,
    secret: Vec<u8>,
    id: String,
    challenge: String,
    pause: Duration,
) -> anyhow::Result<usize> {
    let mut client = WorkerClient::new(&secret, &id, &challenge)?;
    let token = server.verify_worker(&id, client.client_response())?;
    client.set_session_token(token.as_str());

    let mut completed = 0;
    loop {
        let mut work = match server.fetch_work(&id, &token) {
            Ok(Some(work)) => work,
            Ok(None) => break,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e.into()),
        };

        let job: SumJob = match client.process(&mut work) {
            Ok(job) => job,
            Err(e) if e.is_timeout() => {
                // Report it so the server records the timeout and drops it.
                match server.complete_work(&work.id.hex(), &serde_json::Value::Null, "") {
                    Ok(_) => {}
                    Err(e) if e.is_timeout() => {}
                    Err(e) => {
                        warn!(work_id = %work.id, error = %e, "could not report timed out job");
                    }
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let sum: u64 = job.numbers.iter().sum();
        match server.complete_work(&work.id.hex(), &serde_json::json!({ "sum": sum }), "") {
            Ok(_) => completed += 1,
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(pause).await;
    }

    info!(worker_id = %id, completed, "worker finished");
    Ok(completed)
}
