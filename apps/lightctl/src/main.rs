use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remote_shell::{LocalShellConnector, SessionConnector, SshConnector};
use serde::Serialize;
use shared::domain::{Brightness, Channel};
use show_core::{
    parse_script, CommandRegistry, Program, ProgramEvent, Router, RouterEvent, StateStore,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "lightctl", about = "Drive LEDs on a remote host over a shell session")]
struct Cli {
    /// Settings file; `lightshow.toml` is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    address: Option<String>,
    #[arg(long, global = true)]
    user: Option<String>,
    #[arg(long, global = true)]
    base_path: Option<String>,
    /// Keep goals when the device changes on its own.
    #[arg(long, global = true)]
    guard: bool,
    /// Use a local `sh` rooted at this directory instead of ssh.
    #[arg(long, global = true, value_name = "DIR")]
    local: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print discovered channels with their current values.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Run a script until it stops or Ctrl-C.
    Run {
        #[arg(required_unless_present = "expr", conflicts_with = "expr")]
        file: Option<PathBuf>,
        #[arg(short = 'e', long = "expr", value_name = "SCRIPT")]
        expr: Option<String>,
    },
    /// Set the goal of every channel, in discovery order.
    Set {
        #[arg(required = true)]
        values: Vec<Brightness>,
    },
    /// Print connection and model changes until Ctrl-C.
    Monitor,
}

#[derive(Serialize)]
struct ChannelRow<'a> {
    #[serde(flatten)]
    channel: &'a Channel,
    observed: Brightness,
    goal: Brightness,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    apply_cli(&mut settings, &cli);

    let router = Router::new(connector(&settings), settings.router_config());
    router
        .connect(
            &settings.address,
            &settings.user,
            &settings.password,
            &settings.base_path,
        )
        .await
        .with_context(|| format!("connecting to {}", settings.address))?;

    let outcome = match cli.command {
        Command::List { json } => list(&router.state(), json),
        Command::Run { file, expr } => run(&router, &settings, file, expr).await,
        Command::Set { values } => set(&router, &values).await,
        Command::Monitor => monitor(&router).await,
    };

    router.shutdown().await;
    outcome
}

fn apply_cli(settings: &mut Settings, cli: &Cli) {
    if let Some(v) = &cli.address {
        settings.address = v.clone();
    }
    if let Some(v) = &cli.user {
        settings.user = v.clone();
    }
    if let Some(v) = &cli.base_path {
        settings.base_path = v.clone();
    }
    if cli.guard {
        settings.guard = true;
    }
    if let Some(v) = &cli.local {
        settings.local_root = Some(v.clone());
    }
}

fn connector(settings: &Settings) -> Arc<dyn SessionConnector> {
    match &settings.local_root {
        Some(root) => Arc::new(LocalShellConnector::new(root)),
        None => Arc::new(SshConnector {
            program: settings.ssh_program.clone(),
            use_sshpass: settings.use_sshpass,
            ..SshConnector::default()
        }),
    }
}

fn list(state: &StateStore, json: bool) -> Result<()> {
    let channels = state.channels();
    let observed = state.observed();
    let goals = state.goals();
    let rows: Vec<_> = channels
        .iter()
        .zip(observed.iter().zip(goals.iter()))
        .map(|(channel, (&observed, &goal))| ChannelRow {
            channel,
            observed,
            goal,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in rows {
        println!(
            "{:>3}  {:<12} {:>4}  {}",
            row.channel.id, row.channel.name, row.observed, row.channel.remote_path
        );
    }
    Ok(())
}

async fn run(
    router: &Router,
    settings: &Settings,
    file: Option<PathBuf>,
    expr: Option<String>,
) -> Result<()> {
    let text = match (file, expr) {
        (_, Some(expr)) => expr,
        (Some(file), None) => tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("reading script {}", file.display()))?,
        (None, None) => bail!("no script given"),
    };

    let program = Program::start(
        parse_script(&text),
        router.state(),
        Arc::new(CommandRegistry::standard()),
        settings.program_config(),
    );
    let mut events = program.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ProgramEvent::Trace(text)) => println!("{text}"),
                Ok(ProgramEvent::Stopped(reason)) => {
                    info!(?reason, "script ended");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "trace output lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping script");
                program.stop();
                break;
            }
        }
    }

    program.wait().await;
    flush_writes(router).await;
    Ok(())
}

async fn set(router: &Router, values: &[Brightness]) -> Result<()> {
    router.state().set_goals(values)?;
    flush_writes(router).await;
    if router.state().observed() != values {
        bail!("device did not accept all values");
    }
    Ok(())
}

async fn monitor(router: &Router) -> Result<()> {
    let mut events = router.subscribe_events();
    let state = router.state();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RouterEvent::ModelChanged) => println!("model {:?}", state.goals()),
                Ok(RouterEvent::ConnectionChanged(Some(address))) => {
                    println!("connected to {address}");
                }
                Ok(RouterEvent::ConnectionChanged(None)) => println!("disconnected"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Gives the writer a chance to push the last goals before the session
/// goes away.
async fn flush_writes(router: &Router) {
    let state = router.state();
    let deadline = tokio::time::Instant::now() + router.config().write_timeout;
    while state.observed() != state.goals() && tokio::time::Instant::now() < deadline {
        if !router.connection_state().is_connected() {
            warn!("connection lost before all writes were sent");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
