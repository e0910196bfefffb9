// Tidemark - headless plot workbench and command bridge client

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tidemark_app::client::BridgeClient;
use tidemark_app::exit_codes::{CallErrorOutput, EXIT_BIND, EXIT_PLOT_LOAD, EXIT_SUCCESS, EXIT_USAGE};
use tidemark_app::session_server::{SessionBridgeHandle, SessionServer, SessionServerConfig};
use tidemark_app::Workbench;
use tidemark_config::Settings;
use tidemark_engine::{EventKind, NoticeLevel, StateEvent};
use tidemark_protocol::Request;
use tracing_subscriber::EnvFilter;

/// How often the host loop wakes when no requests arrive.
const SERVE_TICK: Duration = Duration::from_millis(250);

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Track plot workbench: serve plots over the command bridge, or drive a running one")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open plots headlessly and accept bridge commands until killed
    #[command(after_help = "\
Examples:
  tidemark serve voyage.plot
  tidemark serve a.plot b.plot --port 0")]
    Serve {
        /// Plot files to open. The last one becomes the active plot.
        plots: Vec<PathBuf>,

        /// Bridge port (overrides bridge.port in settings; 0 picks a free port)
        #[arg(long, env = "TIDEMARK_PORT")]
        port: Option<u16>,

        /// Settings file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Send one command to a running workbench and print its result
    #[command(after_help = "\
Examples:
  tidemark call list_open_plots
  tidemark call get_feature_collection --filename voyage.plot
  tidemark call set_selected_features --params '{\"ids\": [\"f1\"]}'")]
    Call {
        /// Command name, e.g. get_time
        command: String,

        /// Command params as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Plot to address when several are open
        #[arg(long)]
        filename: Option<String>,

        /// Bridge port
        #[arg(long, env = "TIDEMARK_PORT")]
        port: Option<u16>,

        /// Seconds to wait for a reply
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Extra connection attempts, 200ms apart, while the workbench starts
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Print errors as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { plots, port, config } => cmd_serve(plots, port, config),
        Commands::Call {
            command,
            params,
            filename,
            port,
            timeout,
            retries,
            json,
        } => cmd_call(command, params, filename, port, timeout, retries, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            ExitCode::from(code)
        }
    }
}

/// Log to stderr, filtered by `TIDEMARK_LOG` (default `info`). Records from
/// the `log` facade are forwarded too.
fn init_logging() {
    let filter = EnvFilter::try_from_env("TIDEMARK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
struct CliError {
    code: u8,
    /// Empty when the error has already been printed.
    message: String,
}

impl CliError {
    fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn cmd_serve(plots: Vec<PathBuf>, port: Option<u16>, config: Option<PathBuf>) -> Result<(), CliError> {
    let settings = match config {
        Some(path) => Settings::load_from(&path),
        None => Settings::load(),
    };

    let mut workbench = Workbench::with_settings(&settings);
    workbench.registry_mut().on(
        EventKind::Notice,
        Box::new(|event: &StateEvent| {
            if let StateEvent::Notice(notice) = event {
                match notice.level {
                    NoticeLevel::Info => log::info!("{}", notice.message),
                    NoticeLevel::Warning => log::warn!("{}", notice.message),
                    NoticeLevel::Error => log::error!("{}", notice.message),
                }
            }
        }),
    );

    for path in &plots {
        let editor_id = workbench
            .open_file(path)
            .map_err(|e| CliError::new(EXIT_PLOT_LOAD, format!("{}: {}", path.display(), e)))?;
        workbench
            .focus(&editor_id)
            .map_err(|e| CliError::new(EXIT_PLOT_LOAD, e.to_string()))?;
    }

    let (tx, rx) = mpsc::channel();
    let mut server_config =
        SessionServerConfig::from_settings(&settings, SessionBridgeHandle::new(tx), workbench.session_targets());
    if let Some(port) = port {
        server_config = server_config.with_port(port);
    }

    let mut server = SessionServer::new();
    server
        .start(server_config)
        .map_err(|e| CliError::new(EXIT_BIND, format!("cannot start command bridge: {}", e)))?;
    if let Some(addr) = server.bound_addr() {
        // Machine-readable line for wrappers that start us with --port 0
        println!("READY {}", addr.port());
    }

    workbench.serve(&rx, SERVE_TICK, || server.is_running());
    Ok(())
}

fn cmd_call(
    command: String,
    params: Option<String>,
    filename: Option<String>,
    port: Option<u16>,
    timeout: u64,
    retries: u32,
    json: bool,
) -> Result<(), CliError> {
    let params: Value = match params {
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| CliError::new(EXIT_USAGE, format!("--params is not valid JSON: {}", e)))?,
        None => Value::Null,
    };
    let port = port.unwrap_or_else(|| Settings::load().bridge_port);

    let mut request = Request::new(command).with_params(params);
    if let Some(name) = filename {
        request = request.with_filename(name);
    }

    let outcome = BridgeClient::connect_with_retry(port, retries, CONNECT_RETRY_DELAY).and_then(|mut client| {
        client.set_timeout(Some(Duration::from_secs(timeout)))?;
        Ok(client.call(request)?.into_result()?)
    });

    match outcome {
        Ok(result) => {
            let pretty = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
            println!("{}", pretty);
            Ok(())
        }
        Err(e) => {
            let output = CallErrorOutput::from_client_error(&e);
            output.print(json);
            Err(CliError::new(output.exit_code, String::new()))
        }
    }
}
