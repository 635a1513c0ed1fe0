//! Claude Bridge - supervise a Claude CLI process and fan its output out to
//! chat frontends.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_bridge::bridge::{BridgeClient, BridgeServer, StartOptions};
use claude_bridge::classify::Mode;
use claude_bridge::config::{BridgeConfig, ConfigLoader};
use claude_bridge::display;
use claude_bridge::mirror::{LogMirror, OutputLog};
use claude_bridge::process::Supervisor;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Normal,
    Bypass,
    Yolo,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Normal => Mode::Normal,
            ModeArg::Bypass => Mode::Bypass,
            ModeArg::Yolo => Mode::Yolo,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Supervise a Claude CLI process and fan its output out to chat frontends",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server.
    Serve {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
        /// Executable spawned when a start command carries none.
        #[arg(long)]
        executable: Option<PathBuf>,
        /// Path of the durable output log.
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Deliver live output to subscribers through the log replay path.
        #[arg(long)]
        via_log: bool,
    },
    /// Start the supervised process.
    Start {
        /// Executable override.
        #[arg(long)]
        executable: Option<String>,
        /// Working directory for the process.
        #[arg(long)]
        working_dir: Option<String>,
        /// Permission mode to launch in.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Bridge port to connect to.
        #[arg(short, long)]
        port: Option<u16>,
        /// Arguments passed to the process.
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Stop the supervised process.
    Stop {
        /// Bridge port to connect to.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send a line of input to the process.
    Send {
        /// Text to send; a newline is appended.
        text: String,
        /// Bridge port to connect to.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Query whether the process is running.
    Status {
        /// Bridge port to connect to.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Subscribe to the event stream and print it.
    Watch {
        /// Bridge port to connect to.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn client_for(config: &BridgeConfig, port: Option<u16>) -> BridgeClient {
    let port = port.unwrap_or(config.port);
    BridgeClient::new(format!("{}:{port}", config.host))
}

fn fail(message: &str) -> ! {
    display::print_error(message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => fail(&e.to_string()),
    };

    match cli.command {
        Commands::Serve {
            port,
            executable,
            log_file,
            via_log,
        } => serve(config, port, executable, log_file, via_log).await,
        Commands::Start {
            executable,
            working_dir,
            mode,
            port,
            args,
        } => {
            let client = client_for(&config, port);
            let options = StartOptions {
                executable,
                args,
                working_dir,
                mode: mode.map(Into::into),
            };
            match client.start(options).await {
                Ok(ack) if ack.ok => {
                    println!("started pid {}", ack.pid.unwrap_or(0));
                }
                Ok(ack) => fail(ack.msg.as_deref().unwrap_or("start failed")),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Stop { port } => {
            let client = client_for(&config, port);
            match client.stop().await {
                Ok(ack) if ack.ok => println!("stopped"),
                Ok(ack) => fail(ack.msg.as_deref().unwrap_or("stop failed")),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Send { text, port } => {
            let client = client_for(&config, port);
            match client.send_input(text).await {
                Ok(ack) if ack.ok => println!("sent"),
                Ok(ack) => fail(ack.msg.as_deref().unwrap_or("send failed")),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Status { port } => {
            let client = client_for(&config, port);
            match client.status().await {
                Ok(snapshot) => println!("running: {}", snapshot.running),
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Watch { port } => {
            let client = client_for(&config, port);
            let mut subscription = client.subscribe();
            loop {
                tokio::select! {
                    event = subscription.recv() => {
                        let Some(event) = event else { break };
                        display::print_event(&event);
                    }
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "failed to listen for ctrl-c");
                        }
                        break;
                    }
                }
            }
        }
    }
}

async fn serve(
    mut config: BridgeConfig,
    port: Option<u16>,
    executable: Option<PathBuf>,
    log_file: Option<PathBuf>,
    via_log: bool,
) {
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(executable) = executable {
        config.executable = executable;
    }
    if let Some(log_file) = log_file {
        config.log_file = log_file;
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let log = OutputLog::new(&config.log_file);
    let cancel = CancellationToken::new();

    let supervisor = if via_log {
        // Live stdout/stderr reaches subscribers through the log replay
        // path; only lifecycle events are forwarded directly.
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let handle = Supervisor::spawn(live_tx, Some(log.clone()));

        let forward = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = live_rx.recv().await {
                if event.is_process() && forward.send(event).is_err() {
                    break;
                }
            }
        });

        let mirror = LogMirror::new(log.clone(), event_tx.clone())
            .with_interval(Duration::from_millis(config.poll_interval_ms));
        let mirror_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = mirror.run(mirror_cancel).await {
                tracing::warn!(error = %e, "log mirror stopped");
            }
        });

        handle
    } else {
        Supervisor::spawn(event_tx.clone(), Some(log.clone()))
    };
    drop(event_tx);

    let server = BridgeServer::new(config.port)
        .with_host(config.host.clone())
        .with_default_executable(config.executable.clone());

    let handle = match server.start(supervisor, event_rx).await {
        Ok(handle) => handle,
        Err(e) => fail(&e.to_string()),
    };
    display::print_listening(&handle.local_addr().to_string());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
    cancel.cancel();
    handle.shutdown();
}
