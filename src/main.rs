use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;

use grow_reminder::config::ReminderConfig;
use grow_reminder::notify::{
    ChannelRegistry, FanoutSink, LocalChannelRegistry, NotificationSink, PushChannel, TracingSink,
};
use grow_reminder::reminders::{DueSweep, ReminderDispatcher, ReminderRunner, spawn_due_sweep};
use grow_reminder::store::{LibSqlBackend, ReminderLedger, TaskStore};

const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = ReminderConfig::from_env();
    // Dropped when `main` returns, flushing any buffered file output.
    let _log_guard = init_tracing(&config);

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "grow-reminder failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ReminderConfig) -> anyhow::Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("serve");

    match command {
        "serve" => {
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        "dispatch" => {
            let Some(task_id) = args.get(1) else {
                eprintln!("Usage: grow-reminder dispatch <task_id>");
                return Ok(ExitCode::from(EXIT_USAGE));
            };
            dispatch_once(config, task_id).await
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: grow-reminder [serve | dispatch <task_id>]");
            Ok(ExitCode::from(EXIT_USAGE))
        }
    }
}

/// Stderr logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(config: &ReminderConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "grow-reminder.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

struct Engine {
    db: Arc<LibSqlBackend>,
    push: PushChannel,
    runner: Arc<ReminderRunner>,
}

async fn build_engine(config: &ReminderConfig) -> grow_reminder::error::Result<Engine> {
    config.validate()?;
    let db = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);

    let registry: Arc<dyn ChannelRegistry> = Arc::new(LocalChannelRegistry::new());
    let push = PushChannel::new();
    let sinks: Vec<Arc<dyn NotificationSink>> =
        vec![Arc::new(push.clone()), Arc::new(TracingSink)];
    let sink: Arc<dyn NotificationSink> = Arc::new(FanoutSink::new(sinks));

    let store: Arc<dyn TaskStore> = db.clone();
    let dispatcher = Arc::new(ReminderDispatcher::new(store, registry, sink));
    let runner = Arc::new(ReminderRunner::new(dispatcher, config.retry.clone()));

    Ok(Engine { db, push, runner })
}

async fn serve(config: ReminderConfig) -> anyhow::Result<()> {
    let engine = build_engine(&config)
        .await
        .with_context(|| format!("starting with database {}", config.db_path.display()))?;

    eprintln!("🌱 Grow Reminder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Reminders WS: ws://0.0.0.0:{}/ws/reminders", config.ws_port);
    eprintln!("   Sweep: every {}s", config.sweep_interval.as_secs());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.ws_port))
        .await
        .with_context(|| format!("binding reminder server port {}", config.ws_port))?;
    let app = engine.push.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Reminder server stopped");
        }
    });
    tracing::info!(port = config.ws_port, "Reminder WebSocket server started");

    let ledger: Arc<dyn ReminderLedger> = engine.db.clone();
    let sweep = Arc::new(DueSweep::new(ledger, Arc::clone(&engine.runner)));
    let sweep_handle = spawn_due_sweep(sweep, config.sweep_interval);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down");
    sweep_handle.abort();
    Ok(())
}

/// Run one task through the retry policy and map the outcome to an exit code.
async fn dispatch_once(config: ReminderConfig, task_id: &str) -> anyhow::Result<ExitCode> {
    let engine = build_engine(&config)
        .await
        .with_context(|| format!("starting with database {}", config.db_path.display()))?;
    let report = engine.runner.run(task_id).await;

    eprintln!(
        "{}: {} after {} attempt(s)",
        task_id, report.outcome, report.attempts
    );

    Ok(ExitCode::from(report.outcome.exit_code()))
}
