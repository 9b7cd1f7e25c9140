//! redisq CLI: send messages, watch a queue, run workers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use redisq::config::{Config, ConnectionConfig, ConnectionOptions, ScalingConfig};
use redisq::handler::CommandHandler;
use redisq::model::{DebounceStamp, DelayStamp, Envelope, UniqueStamp};
use redisq::process::{ProcessManager, SubprocessManager};
use redisq::receiver::{
    AutoScalingReceiver, LoggingTransport, MessageHandler, Receiver, RetryForeverReceiver,
};
use redisq::telemetry::{TelemetryConfig, init_telemetry};
use redisq::transport::{QueueReceiver, Transport};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "redisq", about = "Redis-backed work queue")]
struct Cli {
    /// Queue name, overriding the one in REDISQ_DSN
    #[arg(long, global = true)]
    queue: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message
    Send {
        /// Message body
        body: String,
        /// Header as NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        /// Deduplicate by content hash, or by --id if given
        #[arg(long)]
        unique: bool,
        /// Explicit dedup id (implies --unique)
        #[arg(long)]
        id: Option<String>,
        /// Debounce window in milliseconds
        #[arg(long, conflicts_with = "unique")]
        debounce: Option<u64>,
        /// Delay delivery by this many milliseconds
        #[arg(long)]
        delay: Option<u64>,
        /// Send the message this many times
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Print queue sizes and ready-list velocity until interrupted
    Stats {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Run a single worker until interrupted
    Consume {
        /// Executable to run per message (body on stdin); logs messages if absent
        #[arg(long)]
        handler: Option<PathBuf>,
    },
    /// Run an autoscaled pool of workers until interrupted
    Work {
        /// Executable to run per message (body on stdin); logs messages if absent
        #[arg(long)]
        handler: Option<PathBuf>,
        /// How workers are created
        #[arg(long, value_enum, default_value_t = Strategy::Task)]
        strategy: Strategy,
        /// Scaling config TOML (interval_ms, threshold, max_workers)
        #[arg(long)]
        scaling: Option<PathBuf>,
        /// Worker command for the subprocess strategy [default: this binary's `consume`]
        #[arg(long)]
        worker_command: Option<String>,
        /// Seconds a subprocess worker may take to exit after SIGTERM
        #[arg(long, default_value_t = 10)]
        grace_secs: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Task,
    Subprocess,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "redisq".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let connection = ConnectionConfig::from_dsn(
        config.dsn.expose_secret(),
        ConnectionOptions {
            queue: cli.queue.clone(),
            ..Default::default()
        },
    )?;
    let transport = Arc::new(Transport::from_config(&connection)?);

    match cli.command {
        Command::Send {
            body,
            headers,
            unique,
            id,
            debounce,
            delay,
            count,
        } => {
            let mut envelope = Envelope::new(body);
            for (name, value) in headers {
                envelope = envelope.header(name, value);
            }
            if let Some(delay_ms) = debounce {
                envelope = envelope.with(match id {
                    Some(id) => DebounceStamp::new(delay_ms, id),
                    None => DebounceStamp::by_content(delay_ms),
                });
            } else if let Some(id) = id {
                envelope = envelope.with(UniqueStamp::new(id));
            } else if unique {
                envelope = envelope.with(UniqueStamp::by_content());
            }
            if let Some(delay_ms) = delay {
                envelope = envelope.with(DelayStamp::new(delay_ms));
            }
            cmd_send(&transport, &envelope, count).await
        }
        Command::Stats { interval_ms } => {
            cmd_stats(&transport, Duration::from_millis(interval_ms.max(1))).await
        }
        Command::Consume { handler } => cmd_consume(transport, message_handler(handler)).await,
        Command::Work {
            handler,
            strategy,
            scaling,
            worker_command,
            grace_secs,
        } => {
            let scaling = match scaling {
                Some(path) => ScalingConfig::load(&path)?,
                None => ScalingConfig::default(),
            };
            let process_manager = match strategy {
                Strategy::Task => ProcessManager::task(),
                Strategy::Subprocess => {
                    let manager = match worker_command {
                        Some(command) => SubprocessManager::from_command_line(&command)?,
                        None => default_worker_command(cli.queue.as_deref(), handler.as_ref())?,
                    };
                    ProcessManager::subprocess(
                        manager.grace_period(Duration::from_secs(grace_secs)),
                    )
                }
            };
            cmd_work(transport, message_handler(handler), process_manager, scaling).await
        }
    }
}

async fn cmd_send(transport: &Transport, envelope: &Envelope, count: u32) -> anyhow::Result<()> {
    for _ in 0..count {
        let status = transport.enqueue(envelope).await?;
        println!("{status}");
    }
    Ok(())
}

async fn cmd_stats(transport: &Transport, interval: Duration) -> anyhow::Result<()> {
    let shutdown = shutdown_token();
    let mut last = transport.stats().await?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
        let current = transport.stats().await?;
        let per_second = (current.ready as f64 - last.ready as f64) / interval.as_secs_f64();
        println!(
            "ready={} processing={} delayed={} unique={} messages/s={per_second:.2}",
            current.ready, current.processing, current.delayed, current.unique
        );
        last = current;
    }
}

async fn cmd_consume(
    transport: Arc<Transport>,
    handler: Arc<dyn MessageHandler>,
) -> anyhow::Result<()> {
    let receiver: Arc<dyn Receiver> = Arc::new(LoggingTransport::new(RetryForeverReceiver::new(
        Arc::new(QueueReceiver::new(transport)),
    )));
    let shutdown = shutdown_token();
    stop_on_shutdown(Arc::clone(&receiver), shutdown.clone());

    info!("worker started");
    receiver.receive(handler, &shutdown).await?;
    info!("worker exiting");
    Ok(())
}

async fn cmd_work(
    transport: Arc<Transport>,
    handler: Arc<dyn MessageHandler>,
    process_manager: ProcessManager,
    scaling: ScalingConfig,
) -> anyhow::Result<()> {
    let worker: Arc<dyn Receiver> = Arc::new(RetryForeverReceiver::new(Arc::new(
        QueueReceiver::new(Arc::clone(&transport)),
    )));
    let receiver: Arc<dyn Receiver> = Arc::new(AutoScalingReceiver::new(
        worker,
        transport,
        process_manager,
        scaling,
    ));
    let shutdown = shutdown_token();
    stop_on_shutdown(Arc::clone(&receiver), shutdown.clone());

    info!("supervisor started");
    receiver.receive(handler, &shutdown).await?;
    info!("supervisor exiting");
    Ok(())
}

fn message_handler(command: Option<PathBuf>) -> Arc<dyn MessageHandler> {
    match command {
        Some(command) => Arc::new(CommandHandler::new(command)),
        None => Arc::new(LogHandler),
    }
}

/// `<this binary> consume`, forwarding the queue and handler.
fn default_worker_command(
    queue: Option<&str>,
    handler: Option<&PathBuf>,
) -> anyhow::Result<SubprocessManager> {
    let exe = std::env::current_exe()?;
    let mut manager = SubprocessManager::new(exe.to_string_lossy());
    if let Some(queue) = queue {
        manager = manager.args(["--queue", queue]);
    }
    manager = manager.args(["consume"]);
    if let Some(handler) = handler {
        manager = manager.args(["--handler".to_string(), handler.to_string_lossy().into_owned()]);
    }
    Ok(manager)
}

struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        info!(body = %String::from_utf8_lossy(envelope.body()), "message");
        Ok(())
    }
}

/// Cancelled on the first SIGINT or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}

fn stop_on_shutdown(receiver: Arc<dyn Receiver>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        shutdown.cancelled().await;
        receiver.stop().await;
    });
}
