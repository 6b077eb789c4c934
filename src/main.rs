//! dbrouter: TCP-level reverse proxy for MySQL client/server traffic
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! dbrouter
//!
//! # Run with custom configuration
//! dbrouter -c /path/to/config.json
//!
//! # Generate a default configuration file
//! dbrouter -c /path/to/config.json --generate-config
//!
//! # Check a configuration without starting
//! dbrouter -c /path/to/config.json --check
//! ```
//!
//! Exit codes: 0 on success, 1 on a configuration error, 2 when every
//! routing bind went down at runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use dbrouter::config::{create_default_config, load_config_with_env, Config};
use dbrouter::destination::resolver::global_registry;
use dbrouter::net::{Connector, TcpConnector};
use dbrouter::server::RouterService;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_RUNTIME: i32 = 2;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/dbrouter/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(EXIT_OK);
                }
                "-v" | "--version" => {
                    println!("dbrouter v{}", dbrouter::VERSION);
                    std::process::exit(EXIT_OK);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(EXIT_CONFIG);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"dbrouter v{}

TCP-level reverse proxy for MySQL client/server traffic.

USAGE:
    dbrouter [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/dbrouter/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    DBROUTER_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    DBROUTER_MAX_CONNECTIONS  Override the process-wide connection cap

EXAMPLE:
    dbrouter -c /etc/dbrouter/config.json
"#,
        dbrouter::VERSION
    );
}

/// Initialize logging
///
/// Log level priority (highest to lowest):
/// 1. `RUST_LOG` environment variable
/// 2. Config file `log.level` setting (already folded in by the loader's
///    `DBROUTER_LOG_LEVEL` override)
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let start_time = Instant::now();
    let args = Args::parse();

    if args.generate_config {
        return match create_default_config(&args.config_path)
            .map_err(|e| anyhow!("Failed to generate configuration at {:?}: {}", args.config_path, e))
        {
            Ok(()) => {
                println!("Generated default configuration at {:?}", args.config_path);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("Error: {e:#}");
                EXIT_CONFIG
            }
        };
    }

    let config = match load_config_with_env(&args.config_path)
        .map_err(|e| anyhow!("Failed to load configuration from {:?}: {}", args.config_path, e))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return EXIT_CONFIG;
        }
    };

    if args.check_config {
        println!("Configuration is valid");
        return EXIT_OK;
    }

    init_logging(&config);

    info!("dbrouter v{}", dbrouter::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new());
    let service = match RouterService::build(&config, connector, global_registry())
        .await
        .map_err(|e| anyhow!("Failed to start router service: {}", e))
    {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return EXIT_CONFIG;
        }
    };

    info!(
        "Startup complete in {:.2}ms, {} bind(s) listening",
        start_time.elapsed().as_secs_f64() * 1000.0,
        service.binds().len()
    );

    let run_result = tokio::select! {
        result = service.run() => result,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            Ok(())
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            Ok(())
        }
    };

    service.shutdown().await;

    for bind in service.binds() {
        let stats = bind.manager().stats_snapshot();
        info!(
            "Bind {}: {} accepted, {} completed, {} errored, {} rejected, {} bytes up / {} bytes down",
            bind.local_addr(),
            stats.total_accepted,
            stats.completed,
            stats.errored,
            stats.rejected,
            stats.bytes_to_server,
            stats.bytes_to_client,
        );
    }

    match run_result.map_err(|e| anyhow!("Accept loop error: {}", e)) {
        Ok(()) => {
            info!("Shutdown complete");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_RUNTIME
        }
    }
}

/// Wait for SIGTERM
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
