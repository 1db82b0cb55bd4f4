use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keyweave::config as cfg;
use keyweave::dispatch::Dispatcher;
use keyweave::executor::{ActionExecutor, FunctionRunner};
use keyweave::utils::keys::DeviceKeyPoller;
use keyweave::utils::window::SystemProbe;

/// keyweave CLI
#[derive(Debug, Parser)]
#[command(
    name = keyweave::PKG_NAME,
    version = keyweave::PKG_VERSION,
    about = "Per-application keyboard and mouse macros driven by the foreground window"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Directory holding user function scripts (default: `user_functions` next to the config)
    #[arg(long = "functions-dir")]
    functions_dir: Option<PathBuf>,

    /// Enable dry-run mode (log actions instead of simulating input or launching scripts)
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the configuration and exit
    #[arg(long = "print-schema")]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Honor --log-level before falling back to RUST_LOG.
    match &args.log_level {
        Some(level) => keyweave::init_tracing_with_level(
            keyweave::parse_level(level).unwrap_or(tracing::Level::INFO),
        ),
        None => keyweave::init_tracing(),
    }

    if args.print_schema {
        cfg::write_schema_to_writer(std::io::stdout())?;
        println!();
        return Ok(());
    }

    info!(
        version = keyweave::PKG_VERSION,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "Starting keyweave"
    );

    // Load configuration; the mtime is taken first so an edit during startup still reloads.
    let mtime = cfg::modified_time(&args.config).ok();
    let config = cfg::load_from_path_async(&args.config).await?;
    debug!(target: "keyweave", "Configuration loaded successfully");

    let functions_dir = functions_dir(&args, &config);
    std::fs::create_dir_all(&functions_dir).with_context(|| {
        format!(
            "Failed to create functions directory {}",
            functions_dir.display()
        )
    })?;
    info!(dir = %functions_dir.display(), "User functions directory");

    let functions = FunctionRunner::new(
        functions_dir,
        config.global.interpreter.clone(),
        args.dry_run,
    );

    let keys = DeviceKeyPoller::new().context("Keyboard state is unavailable")?;

    for name in config.on_boot_functions() {
        info!(function = %name, "Running OnBoot function");
        functions.run_function_by_name(&name);
    }

    let executor = ActionExecutor::new(args.dry_run, functions);
    let mut dispatcher = Dispatcher::new(
        &config,
        Some(&args.config),
        mtime,
        &executor,
        Box::new(SystemProbe::new()),
        Box::new(keys),
    );

    let exit = CancellationToken::new();
    tokio::select! {
        _ = dispatcher.run(exit.clone()) => {
            warn!("Dispatch loop ended unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            exit.cancel();
        }
    }

    info!("keyweave exited");
    Ok(())
}

/// CLI flag, then `global.functions_dir`, then `user_functions` beside the config file.
fn functions_dir(args: &Args, config: &cfg::Config) -> PathBuf {
    args.functions_dir
        .clone()
        .or_else(|| config.global.functions_dir.clone())
        .unwrap_or_else(|| {
            args.config
                .parent()
                .unwrap_or(Path::new("."))
                .join("user_functions")
        })
}
