//! nanoclaw CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "nanoclaw", version)]
#[command(about = "A chat-driven AI agent supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the supervisor daemon (default when no subcommand is given)
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show status of the running daemon
    Status,
    /// Register a chat channel for the supervisor to serve (§4.5 `register_channel`)
    RegisterChannel {
        /// Opaque chat channel id
        channel_id: String,
        /// Human-readable channel name
        name: String,
        /// Filesystem-safe folder slug, unique per channel
        folder: String,
        /// Custom trigger regex (defaults to word-boundary assistant name)
        #[arg(long)]
        trigger: Option<String>,
        /// Do not require a trigger match to invoke the agent
        #[arg(long)]
        no_trigger_required: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Start { foreground: false });

    match command {
        Command::Start { foreground } => cmd_start(cli.debug, foreground),
        Command::Stop => cmd_stop(),
        Command::Status => cmd_status(),
        Command::RegisterChannel { channel_id, name, folder, trigger, no_trigger_required } => {
            cmd_register_channel(channel_id, name, folder, trigger, no_trigger_required)
        }
    }
}

fn cmd_start(debug: bool, foreground: bool) -> anyhow::Result<()> {
    let config = nanoclaw::config::Config::load().context("failed to load configuration")?;
    let paths = nanoclaw::daemon::DaemonPaths::new(&config.data_dir);

    if let Some(pid) = nanoclaw::daemon::is_running(&paths) {
        eprintln!("nanoclaw is already running (pid {pid})");
        std::process::exit(1);
    }

    if !foreground {
        // Daemonize *before* the Tokio runtime is built: fork() does not
        // carry a multi-threaded runtime's I/O driver and thread pool
        // across it.
        nanoclaw::daemon::daemonize(&paths)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        if foreground {
            nanoclaw::daemon::init_foreground_tracing(debug);
        } else {
            nanoclaw::daemon::init_background_tracing(&paths, debug);
        }
        run(config, paths).await
    })
}

async fn run(config: nanoclaw::config::Config, paths: nanoclaw::daemon::DaemonPaths) -> anyhow::Result<()> {
    tracing::info!("starting nanoclaw");
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let config = Arc::new(config);

    let pool = nanoclaw::store::connect(&config.sqlite_path())
        .await
        .context("failed to open state store")?;
    let state = Arc::new(nanoclaw::store::state::StateStore::new(pool.clone()));
    let sessions = Arc::new(nanoclaw::store::session::SessionStore::new(pool));

    let runner = Arc::new(
        nanoclaw::container::ContainerRunner::connect()
            .await
            .context("no container runtime available")?,
    );

    let chat: Arc<dyn nanoclaw::messaging::OutboundChat> = Arc::new(LoggingChat);

    let supervisor = nanoclaw::supervisor::Supervisor::new(
        Arc::clone(&config),
        state,
        sessions,
        runner,
        chat,
    );

    let (ipc_shutdown_rx, _ipc_handle) = nanoclaw::daemon::start_ipc_server(&paths)
        .await
        .context("failed to start daemon IPC server")?;

    let (master_tx, master_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(ipc_shutdown_rx, master_tx));

    supervisor.run(master_rx).await?;

    nanoclaw::daemon::cleanup(&paths);
    tracing::info!("nanoclaw stopped");
    Ok(())
}

/// Fold the daemon's own IPC shutdown command together with OS signals into
/// one shutdown watch channel the supervisor observes (§4.8 "graceful signal
/// handling").
async fn wait_for_shutdown_signal(mut ipc_shutdown_rx: watch::Receiver<bool>, master_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    #[cfg(unix)]
    tokio::select! {
        _ = ipc_shutdown_rx.wait_for(|shutdown| *shutdown) => {
            tracing::info!("shutdown requested via daemon IPC");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested via SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("shutdown requested via SIGTERM");
        }
    }

    #[cfg(not(unix))]
    tokio::select! {
        _ = ipc_shutdown_rx.wait_for(|shutdown| *shutdown) => {
            tracing::info!("shutdown requested via daemon IPC");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested via SIGINT");
        }
    }

    let _ = master_tx.send(true);
}

/// Placeholder outbound-chat collaborator: the real chat platform client is
/// deliberately out of scope (§1). Logs every delivery instead of sending it
/// anywhere, so the supervisor is runnable end to end without one.
struct LoggingChat;

impl nanoclaw::messaging::OutboundChat for LoggingChat {
    fn send<'a>(
        &'a self,
        channel_id: &'a nanoclaw::ChannelId,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = nanoclaw::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(%channel_id, text, "outbound chat (no platform configured)");
            Ok(())
        })
    }
}

fn cmd_stop() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        let config = nanoclaw::config::Config::load().context("failed to load configuration")?;
        let paths = nanoclaw::daemon::DaemonPaths::new(&config.data_dir);

        let Some(pid) = nanoclaw::daemon::is_running(&paths) else {
            eprintln!("nanoclaw is not running");
            std::process::exit(1);
        };

        match nanoclaw::daemon::send_command(&paths, nanoclaw::daemon::IpcCommand::Shutdown).await {
            Ok(nanoclaw::daemon::IpcResponse::Ok) => {
                eprintln!("stopping nanoclaw (pid {pid})...");
            }
            Ok(nanoclaw::daemon::IpcResponse::Error { message }) => {
                eprintln!("shutdown failed: {message}");
                std::process::exit(1);
            }
            Ok(_) => {
                eprintln!("unexpected response from daemon");
                std::process::exit(1);
            }
            Err(error) => {
                eprintln!("failed to send shutdown command: {error}");
                std::process::exit(1);
            }
        }

        if nanoclaw::daemon::wait_for_exit(pid) {
            eprintln!("nanoclaw stopped");
        } else {
            eprintln!("nanoclaw did not stop within 10 seconds (pid {pid})");
            std::process::exit(1);
        }

        Ok(())
    })
}

fn cmd_status() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        let config = nanoclaw::config::Config::load().context("failed to load configuration")?;
        let paths = nanoclaw::daemon::DaemonPaths::new(&config.data_dir);

        let Some(_pid) = nanoclaw::daemon::is_running(&paths) else {
            eprintln!("nanoclaw is not running");
            std::process::exit(1);
        };

        match nanoclaw::daemon::send_command(&paths, nanoclaw::daemon::IpcCommand::Status).await {
            Ok(nanoclaw::daemon::IpcResponse::Status { pid, uptime_seconds }) => {
                let hours = uptime_seconds / 3600;
                let minutes = (uptime_seconds % 3600) / 60;
                let seconds = uptime_seconds % 60;
                eprintln!("nanoclaw is running");
                eprintln!("  pid:    {pid}");
                eprintln!("  uptime: {hours}h {minutes}m {seconds}s");
            }
            Ok(nanoclaw::daemon::IpcResponse::Error { message }) => {
                eprintln!("status query failed: {message}");
                std::process::exit(1);
            }
            Ok(_) => {
                eprintln!("unexpected response from daemon");
                std::process::exit(1);
            }
            Err(error) => {
                eprintln!("failed to query daemon status: {error}");
                std::process::exit(1);
            }
        }

        Ok(())
    })
}

fn cmd_register_channel(
    channel_id: String,
    name: String,
    folder: String,
    trigger: Option<String>,
    no_trigger_required: bool,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        let config = nanoclaw::config::Config::load().context("failed to load configuration")?;
        let pool = nanoclaw::store::connect(&config.sqlite_path())
            .await
            .context("failed to open state store")?;
        let state = nanoclaw::store::state::StateStore::new(pool);

        let group = nanoclaw::store::state::RegisteredGroup {
            channel_id: channel_id.clone().into(),
            name,
            folder: folder.into(),
            trigger,
            requires_trigger: !no_trigger_required,
            container_overrides: nanoclaw::store::state::ContainerOverrides::default(),
            added_at: chrono::Utc::now().to_rfc3339(),
        };
        state.register_group(&group).await.context("failed to register channel")?;

        eprintln!("registered channel {channel_id}");
        Ok(())
    })
}
