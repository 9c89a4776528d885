//! SILC command-line interface.
//!
//! Daemon lifecycle commands plus thin client commands against the daemon
//! control plane and per-session APIs. Session targets are a port number
//! or a session name (resolved through the daemon).

mod client;

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use client::{DaemonClient, SessionClient};
use silc_core::SilcConfig;
use silc_daemon::{Daemon, DaemonOptions};

#[derive(Parser)]
#[command(
    name = "silc",
    version,
    about = "Interactive shells as a controllable network service"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Create a new session
    New {
        /// Session name (auto-generated when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Explicit session port
        #[arg(long)]
        port: Option<u16>,

        /// Shell dialect (bash, zsh, sh, cmd, pwsh)
        #[arg(long)]
        shell: Option<String>,

        /// Working directory for the shell
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Bind on all interfaces instead of loopback
        #[arg(long)]
        global: bool,
    },

    /// List active sessions
    List,

    /// Resolve a session name to its port
    Resolve { name: String },

    /// Fetch the rendered screen
    Out {
        target: String,
        #[arg(default_value_t = 100)]
        lines: usize,
    },

    /// Fetch raw output lines
    Raw {
        target: String,
        #[arg(default_value_t = 100)]
        lines: usize,
    },

    /// Run a command and capture its exit code
    Run {
        target: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
        /// Seconds before the run reports a timeout
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Send raw input to the session
    In {
        target: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
        /// Do not append a newline
        #[arg(long)]
        nonewline: bool,
    },

    /// Show session status
    Status { target: String },

    /// Resize the session terminal
    Resize {
        target: String,
        rows: u16,
        cols: u16,
    },

    /// Send Ctrl-C to the session
    Interrupt { target: String },

    /// Tail the session log
    Logs {
        target: String,
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },

    /// Close a session gracefully
    Close { target: String },

    /// Force-kill a session
    Kill { target: String },

    /// Print the session token
    Token { target: String },

    /// Manage stream-to-file tasks
    Stream {
        #[command(subcommand)]
        action: StreamAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run the daemon in the foreground
    Run,
    /// Start the daemon as a detached background process
    Start,
    /// Gracefully shut down the daemon and all sessions
    Shutdown,
    /// Force-kill the daemon and all sessions
    Killall,
    /// Show daemon status
    Status,
    /// Recreate sessions from sessions.json
    Resurrect,
    /// Bounce only the control-plane HTTP server
    RestartServer,
}

#[derive(Subcommand)]
enum StreamAction {
    /// Start streaming session output to a file
    Start {
        target: String,
        filename: String,
        /// render (overwrite with the screen) or append (deduplicated)
        #[arg(long, default_value = "render")]
        mode: String,
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Stop a stream and freeze its file
    Stop { target: String, filename: String },
    /// Show active streams
    Status { target: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = dispatch(cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    let config = SilcConfig::load();
    let daemon_port = config.ports.daemon_port;
    let daemon_client = DaemonClient::new(daemon_port);

    match command {
        Commands::Daemon { action } => daemon_command(action, config, daemon_client).await,

        Commands::New {
            name,
            port,
            shell,
            cwd,
            global,
        } => {
            let created = daemon_client
                .post(
                    "/sessions",
                    Some(json!({
                        "name": name,
                        "port": port,
                        "shell": shell,
                        "cwd": cwd,
                        "global": global,
                    })),
                )
                .await?;
            println!(
                "Session {} started on port {}",
                created["name"].as_str().unwrap_or("?"),
                created["port"]
            );
            if let Some(token) = created["token"].as_str() {
                println!("Token: {token}");
            }
            Ok(())
        }

        Commands::List => {
            let sessions = daemon_client.get("/sessions").await?;
            match sessions.as_array() {
                Some(list) if !list.is_empty() => {
                    for session in list {
                        println!(
                            "{}  {}  {}  idle {}s",
                            session["port"],
                            session["name"].as_str().unwrap_or("?"),
                            session["shell"].as_str().unwrap_or("?"),
                            session["idle_seconds"]
                        );
                    }
                }
                _ => println!("No active sessions."),
            }
            Ok(())
        }

        Commands::Resolve { name } => {
            let resolved = daemon_client.get(&format!("/resolve/{name}")).await?;
            println!("{}", resolved["port"]);
            Ok(())
        }

        Commands::Out { target, lines } => {
            let session = session_client(&daemon_client, &target).await?;
            let out = session.get(&format!("/out?lines={lines}")).await?;
            println!("{}", out["output"].as_str().unwrap_or(""));
            Ok(())
        }

        Commands::Raw { target, lines } => {
            let session = session_client(&daemon_client, &target).await?;
            let out = session.get(&format!("/raw?lines={lines}")).await?;
            println!("{}", out["output"].as_str().unwrap_or(""));
            Ok(())
        }

        Commands::Run {
            target,
            command,
            timeout,
        } => {
            let session = session_client(&daemon_client, &target).await?;
            let result = session
                .post(
                    "/run",
                    Some(json!({ "command": command.join(" "), "timeout": timeout })),
                )
                .await?;
            print_run_result(&result);
            Ok(())
        }

        Commands::In {
            target,
            text,
            nonewline,
        } => {
            let session = session_client(&daemon_client, &target).await?;
            let path = if nonewline { "/in?nonewline=true" } else { "/in" };
            session.post_text(path, text.join(" ")).await?;
            Ok(())
        }

        Commands::Status { target } => {
            let session = session_client(&daemon_client, &target).await?;
            let status = session.get("/status").await?;
            println!("Session: {}", status["session_id"].as_str().unwrap_or("?"));
            println!("Alive: {}", status["alive"]);
            println!("Idle: {}s", status["idle_seconds"]);
            if status["waiting_for_input"].as_bool() == Some(true) {
                println!(
                    "Waiting for input: {}",
                    status["last_line"].as_str().unwrap_or("")
                );
            }
            Ok(())
        }

        Commands::Resize { target, rows, cols } => {
            let session = session_client(&daemon_client, &target).await?;
            session
                .post(&format!("/resize?rows={rows}&cols={cols}"), None)
                .await?;
            println!("Resized to {rows}x{cols}");
            Ok(())
        }

        Commands::Interrupt { target } => {
            let session = session_client(&daemon_client, &target).await?;
            session.post("/interrupt", None).await?;
            Ok(())
        }

        Commands::Logs { target, tail } => {
            let session = session_client(&daemon_client, &target).await?;
            let logs = session.get(&format!("/logs?tail={tail}")).await?;
            println!("{}", logs["logs"].as_str().unwrap_or(""));
            Ok(())
        }

        Commands::Close { target } => {
            let port = daemon_client.resolve_target(&target).await?;
            daemon_client
                .post(&format!("/sessions/{port}/close"), None)
                .await?;
            println!("Session on port {port} closed");
            Ok(())
        }

        Commands::Kill { target } => {
            let port = daemon_client.resolve_target(&target).await?;
            daemon_client
                .post(&format!("/sessions/{port}/kill"), None)
                .await?;
            println!("Session on port {port} killed");
            Ok(())
        }

        Commands::Token { target } => {
            let session = session_client(&daemon_client, &target).await?;
            let token = session.get("/token").await?;
            match token["token"].as_str() {
                Some(token) => println!("{token}"),
                None => println!("(no token set)"),
            }
            Ok(())
        }

        Commands::Stream { action } => stream_command(action, daemon_client).await,
    }
}

async fn daemon_command(
    action: DaemonAction,
    config: SilcConfig,
    client: DaemonClient,
) -> Result<()> {
    match action {
        DaemonAction::Run => {
            let daemon = Daemon::new(DaemonOptions {
                config,
                enable_hard_exit: true,
            });
            daemon.run().await
        }

        DaemonAction::Start => {
            let exe = std::env::current_exe().context("cannot locate the silc binary")?;
            let mut command = tokio::process::Command::new(exe);
            command
                .args(["daemon", "run"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            #[cfg(unix)]
            command.process_group(0);

            command.spawn().context("failed to spawn the daemon")?;
            // Give it a moment, then confirm it answers.
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            match client.get("/health").await {
                Ok(_) => println!("Daemon started on port {}", config.ports.daemon_port),
                Err(_) => println!("Daemon launched; it may still be starting up"),
            }
            Ok(())
        }

        DaemonAction::Shutdown => {
            client.post("/shutdown", None).await?;
            println!("Daemon shutting down");
            Ok(())
        }

        DaemonAction::Killall => {
            client.post("/killall", None).await?;
            println!("Daemon and all sessions killed");
            Ok(())
        }

        DaemonAction::Status => {
            let health = client.get("/health").await?;
            println!("Daemon running (pid {})", health["pid"]);
            println!("Version: {}", health["version"].as_str().unwrap_or("?"));
            println!("Data dir: {}", health["data_dir"].as_str().unwrap_or("?"));
            Ok(())
        }

        DaemonAction::Resurrect => {
            let response = client.post("/resurrect", None).await?;
            if let Some(results) = response["results"].as_array() {
                for result in results {
                    let name = result["name"].as_str().unwrap_or("?");
                    let status = result["status"].as_str().unwrap_or("?");
                    match result["port"].as_u64() {
                        Some(port) => println!("{name}: {status} on port {port}"),
                        None => println!("{name}: {status}"),
                    }
                }
            }
            Ok(())
        }

        DaemonAction::RestartServer => {
            client.post("/restart-server", None).await?;
            println!("Control-plane server restarting");
            Ok(())
        }
    }
}

async fn stream_command(action: StreamAction, daemon_client: DaemonClient) -> Result<()> {
    match action {
        StreamAction::Start {
            target,
            filename,
            mode,
            interval,
        } => {
            let session = session_client(&daemon_client, &target).await?;
            session
                .post(
                    "/stream/start",
                    Some(json!({
                        "mode": mode,
                        "filename": filename,
                        "interval": interval,
                    })),
                )
                .await?;
            println!("Streaming to {filename}");
            Ok(())
        }

        StreamAction::Stop { target, filename } => {
            let session = session_client(&daemon_client, &target).await?;
            session
                .post("/stream/stop", Some(json!({ "filename": filename })))
                .await?;
            println!("Stream to {filename} stopped");
            Ok(())
        }

        StreamAction::Status { target } => {
            let session = session_client(&daemon_client, &target).await?;
            let status = session.get("/stream/status").await?;
            match status["streams"].as_object() {
                Some(streams) if !streams.is_empty() => {
                    for (filename, info) in streams {
                        println!(
                            "{filename}: {} ({})",
                            if info["active"].as_bool() == Some(true) {
                                "active"
                            } else {
                                "stopped"
                            },
                            info["mode"].as_str().unwrap_or("?")
                        );
                    }
                }
                _ => println!("No active streams."),
            }
            Ok(())
        }
    }
}

async fn session_client(daemon: &DaemonClient, target: &str) -> Result<SessionClient> {
    let port = daemon.resolve_target(target).await?;
    Ok(SessionClient::new(port))
}

fn print_run_result(result: &Value) {
    if let Some(output) = result["output"].as_str() {
        if !output.is_empty() {
            println!("{output}");
        }
    }
    match result["status"].as_str() {
        Some("completed") => {
            if result["exit_code"].as_i64().unwrap_or(0) != 0 {
                eprintln!("exit code: {}", result["exit_code"]);
            }
        }
        Some(other) => {
            eprintln!(
                "{other}: {}",
                result["error"].as_str().unwrap_or("unknown error")
            );
        }
        None => {}
    }
}
