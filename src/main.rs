use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use reeld::{artifacts, config::DaemonConfig, ipc, AppContext};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "reeld",
    about = "reeld — browser session recording daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON-RPC WebSocket server port
    #[arg(long, env = "REELD_PORT")]
    port: Option<u16>,

    /// Artifact HTTP server port
    #[arg(long, env = "REELD_ARTIFACT_PORT")]
    artifact_port: Option<u16>,

    /// Data directory for config, auth token, and recorded artifacts
    #[arg(long, env = "REELD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "REELD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "REELD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "REELD_LOG_JSON")]
    log_json: bool,

    /// Keep a host-managed continuous recording for every new connection.
    ///
    /// This is the opt-in the Context recording backend requires; it takes
    /// effect for connections made after startup.
    #[arg(long, env = "REELD_RECORD_CONTEXT")]
    record_context: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    ///
    /// Runs reeld in the foreground.
    ///
    /// Examples:
    ///   reeld serve
    ///   reeld
    Serve,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = DaemonConfig::new(
        args.port,
        args.artifact_port,
        args.data_dir.clone(),
        args.log.clone(),
        args.record_context.then_some(true),
    );

    // Log file: CLI flag wins over config.toml.
    let log_file = args.log_file.clone().or_else(|| config.log_file.clone());
    let _log_guard = init_tracing(&config.log, log_file.as_deref(), args.log_json);

    match args.command {
        None | Some(Command::Serve) => serve(config),
    }
}

fn serve(config: DaemonConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("cannot create data directory {}", config.data_dir.display())
        })?;
        std::fs::create_dir_all(config.output_root())
            .context("cannot create artifact output root")?;

        let daemon_id = compute_daemon_id(&config);
        let auth_token = load_or_create_auth_token(&config)?;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            daemon_id = %daemon_id,
            data_dir = %config.data_dir.display(),
            record_context = config.recording.record_context,
            "starting reeld"
        );

        let ctx = Arc::new(AppContext::build(config, daemon_id, auth_token));

        // Artifact HTTP server runs beside the RPC server for the daemon's
        // whole lifetime.
        let artifact_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = artifacts::server::serve(
                artifact_ctx.artifacts.clone(),
                &artifact_ctx.config.bind_address,
                artifact_ctx.config.artifact_port,
            )
            .await
            {
                warn!(err = %e, "artifact server stopped");
            }
        });

        ipc::run(ctx).await
    })
}

/// Stable machine identity: SHA-256 over host identity and the data dir,
/// truncated to 16 hex chars. Survives restarts, differs between installs.
fn compute_daemon_id(config: &DaemonConfig) -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "reeld-host".to_string());
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(config.data_dir.display().to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Read the WebSocket auth token from {data_dir}/auth_token, creating it on
/// first run (mode 0600 on Unix).
fn load_or_create_auth_token(config: &DaemonConfig) -> Result<String> {
    let path = config.data_dir.join("auth_token");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let token = existing.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let token = uuid::Uuid::new_v4().simple().to_string();
    std::fs::write(&path, &token).context("cannot write auth token")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .context("cannot restrict auth token permissions")?;
    }
    info!(path = %path.display(), "auth token created");
    Ok(token)
}

/// Initialise tracing with an env-filter (RUST_LOG wins over --log), an
/// optional daily-rotated file writer, and optional JSON formatting.
///
/// Returns the appender guard; dropping it flushes buffered log lines.
fn init_tracing(
    level: &str,
    log_file: Option<&std::path::Path>,
    json: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reeld={level},info")));

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "reeld.log".to_string());
            let appender = tracing_appender::rolling::daily(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            }
            Some(guard)
        }
        None => {
            if json {
                tracing_subscriber::fmt().with_env_filter(filter).json().init();
            } else {
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
            None
        }
    }
}
