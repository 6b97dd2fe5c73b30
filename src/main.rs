#![forbid(unsafe_code)]

//! `agent-bridge` runs prompts against a configured NDJSON child process.
//!
//! Loads a TOML configuration, starts one session, sends each prompt in
//! turn and prints every caller-visible event plus each turn result to
//! stdout as one JSON object per line. Logs go to stderr. Prompts come from
//! repeated `--prompt` flags, or from stdin lines when none are given.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::audit::JsonlAuditWriter;
use agent_bridge::{AppError, BridgeConfig, Event, Result, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "NDJSON agent process bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Prompt to send; repeat for several turns. Reads stdin lines when absent.
    #[arg(long)]
    prompt: Vec<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured cumulative turn ceiling.
    #[arg(long)]
    max_turns: Option<u32>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    if let Some(max) = args.max_turns {
        config.session.max_turns = Some(max);
    }
    let session_config = config.session_config()?;
    let policies = config.policy_chain()?;
    info!(
        command = session_config.process().command.as_str(),
        rules = policies.len(),
        "configuration loaded"
    );

    // ── Start session ───────────────────────────────────
    let mut builder = Session::builder(session_config).policies(policies);
    if let Some(audit) = &config.audit {
        let writer = JsonlAuditWriter::new(audit.log_dir.clone())?;
        builder = builder.audit_sink(Arc::new(writer));
    }
    let session = builder.start()?;

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "ctrl-c signal handler failed");
            return;
        }
        info!("interrupt received, cancelling");
        signal_ct.cancel();
    });

    let outcome = drive(&session, &args.prompt, &ct).await;

    if let Err(err) = session.close().await {
        error!(%err, "session close failed");
    }
    outcome
}

async fn drive(session: &Session, prompts: &[String], ct: &CancellationToken) -> Result<()> {
    if !prompts.is_empty() {
        for prompt in prompts {
            run_turn(session, prompt, ct).await?;
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            () = ct.cancelled() => return Err(AppError::Cancelled("interrupted".into())),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        run_turn(session, &line, ct).await?;
    }
}

async fn run_turn(session: &Session, prompt: &str, ct: &CancellationToken) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Event>(session.config().queue_capacity());

    let send = async move { session.send_with_events(prompt, &tx, ct).await };
    let print = async {
        while let Some(event) = rx.recv().await {
            emit_line(&serde_json::to_value(&event).unwrap_or_else(|e| {
                json!({ "kind": "unprintable", "error": e.to_string() })
            }));
        }
    };

    let (result, ()) = tokio::join!(send, print);
    match result {
        Ok(result) => {
            emit_line(&json!({ "kind": "turn_result", "session_id": session.session_id(), "result": result }));
            Ok(())
        }
        Err(AppError::TurnLimit(limit)) => {
            if let Some(result) = &limit.result {
                emit_line(&json!({ "kind": "turn_result", "session_id": session.session_id(), "result": result }));
            }
            Err(AppError::TurnLimit(limit))
        }
        Err(err) => Err(err),
    }
}

fn emit_line(value: &serde_json::Value) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = writeln!(stdout, "{value}") {
        warn!(%err, "failed to write to stdout");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
