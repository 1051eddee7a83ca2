//! GG-SANDBOX command-line entry point.
//!
//! ## CLI Subcommands
//!
//! - `gg-sandbox-cli run <file|-> [--package NAME]... [--session ID] [--json]`
//! - `gg-sandbox-cli scan <file|-> [--json]` - Risk scan only (exit 3 if rejected)
//! - `gg-sandbox-cli health [--json]` - Host resource check (exit 0/1)
//! - `gg-sandbox-cli config show|defaults|validate`

use std::process::ExitCode;

use gg_sandbox::cli::{self, config_cmd, exit};
use gg_sandbox::config::{self as sandbox_config, EnvConfig};
use gg_sandbox::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest = args.get(2..).unwrap_or(&[]);
    let json = rest.iter().any(|a| a == "--json");

    let code = match command {
        "run" => match cli::parse_run_args(rest) {
            Ok(run_args) => match load_config() {
                Ok(config) => cli::run_session(&config, run_args).await,
                Err(code) => code,
            },
            Err(e) => {
                eprintln!("Error: {}", e);
                print_command_help("run");
                exit::USAGE
            }
        },
        "scan" => match rest.iter().find(|a| !a.starts_with("--")) {
            Some(source) => match load_config() {
                Ok(config) => cli::run_scan(&config.limits, source, json),
                Err(code) => code,
            },
            None => {
                print_command_help("scan");
                exit::USAGE
            }
        },
        "health" => match load_config() {
            Ok(config) => cli::run_health(&config, json).await,
            Err(code) => code,
        },
        "config" => {
            let subcommand = rest.first().map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => match load_config() {
                    Ok(config) => config_cmd::run_show(&config),
                    Err(code) => code,
                },
                "defaults" => config_cmd::run_defaults(),
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    exit::USAGE
                }
            }
        }
        "help" | "--help" | "-h" => {
            match rest.first() {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            exit::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("gg-sandbox {}", env!("CARGO_PKG_VERSION"));
            exit::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            exit::USAGE
        }
    };

    ExitCode::from(code as u8)
}

/// Load configuration and start logging. Returns the exit code on failure.
fn load_config() -> Result<EnvConfig, i32> {
    let config = sandbox_config::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        exit::USAGE
    })?;
    if let Err(e) = telemetry::init_logging(&config.log) {
        eprintln!("Logging disabled: {}", e);
    }
    Ok(config)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "gg-sandbox - sandboxed code execution v{}

USAGE:
    gg-sandbox-cli <COMMAND> [OPTIONS]

COMMANDS:
    run       Scan, provision, install and execute a snippet
    scan      Risk-scan a snippet without running it
    health    Check host resources against admission thresholds
    config    Show or validate configuration (show, defaults, validate)
    version   Show version information
    help      Show this help message

EXAMPLES:
    gg-sandbox-cli run snippet.js
    echo \"console.log(1)\" | gg-sandbox-cli run -
    gg-sandbox-cli run app.js --package lodash --json
    gg-sandbox-cli scan snippet.js --json
    gg-sandbox-cli config validate

ENVIRONMENT:
    GG_SANDBOX_CONFIG    TOML file layered under environment variables
    GG_SANDBOX_ROOT      Parent directory for session sandboxes
    GG_SANDBOX_LOG_LEVEL Log filter (default: info)
    See `gg-sandbox-cli config defaults` for every variable.

EXIT CODES:
    0  Success
    1  Execution failed / host unhealthy
    2  Usage or configuration error
    3  Rejected for safety reasons
    4  Admission refused, retry later
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "run" => eprintln!(
            "gg-sandbox-cli run - Execute a snippet

USAGE:
    gg-sandbox-cli run <FILE|-> [OPTIONS]

OPTIONS:
    -p, --package NAME  Dependency to install (repeatable, name[@range])
    --session ID        Session id ([A-Za-z0-9_-], max 128 chars)
    --json              Print the result as JSON

DESCRIPTION:
    Runs the full pipeline: admission, resource check, risk scan,
    sandbox provisioning, dependency install, execution and cleanup.
    Ctrl-C force-cleans the session.
"
        ),
        "scan" => eprintln!(
            "gg-sandbox-cli scan - Risk-scan a snippet

USAGE:
    gg-sandbox-cli scan <FILE|-> [--json]

EXIT CODES:
    0  Safe to run
    3  Would be rejected
"
        ),
        "health" => eprintln!(
            "gg-sandbox-cli health - Host resource check

USAGE:
    gg-sandbox-cli health [--json]

DESCRIPTION:
    Samples memory, CPU load and disk usage and compares them with the
    admission thresholds. Sampling failures count as unhealthy.
"
        ),
        "config" => eprintln!(
            "gg-sandbox-cli config - Configuration

USAGE:
    gg-sandbox-cli config show       Effective values (env + file)
    gg-sandbox-cli config defaults   Built-in defaults
    gg-sandbox-cli config validate   Report risky settings (exit 1)
"
        ),
        _ => print_usage(),
    }
}
