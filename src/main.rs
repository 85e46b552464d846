// dutrun CLI - run command sequences on devices under test

use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use dutrun::executor::{Orchestrator, OrchestratorConfig, SshConnector};
use dutrun::output::{
    create_event_channel, parse_entries, terminal::follow_progress, DutError, OutputFormat,
    ProgressTracker, TerminalOutput,
};
use dutrun::parser::{default_config_yaml, parse_config_file, RunConfig};
use dutrun::Workspace;

#[derive(Parser)]
#[command(
    name = "dutrun",
    about = "Run an ordered command sequence on a fleet of devices under test",
    version,
    disable_colored_help = true,
    term_width = 0
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Write a starter configuration
    Init {
        /// Configuration name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the device logs of a configuration
    Log {
        /// Configuration name
        config: String,
    },

    /// Run a configuration against its devices
    Run {
        /// Configuration name
        config: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Maximum devices worked on at once
        #[arg(long, default_value = "10")]
        forks: usize,

        /// SSH connection timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Path to SSH private key, used for devices without a password
        #[arg(long)]
        private_key: Option<String>,

        /// Prompt for the password of devices that have none
        #[arg(short = 'k', long)]
        ask_pass: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { name, force } => init_config(&name, force),
        Commands::Log { config } => show_logs(&config),
        Commands::Run {
            config,
            yes,
            forks,
            timeout,
            private_key,
            ask_pass,
            json,
        } => {
            let format = if json {
                OutputFormat::Json
            } else {
                OutputFormat::Text
            };
            let options = RunOptions {
                yes,
                forks,
                timeout,
                private_key,
                ask_pass,
                format,
                verbose: cli.verbose,
                quiet: cli.quiet,
            };
            run_config(&config, options).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or debug with `--verbose`
fn init_tracing(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("dutrun=debug")
    } else {
        EnvFilter::new("dutrun=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn workspace() -> Result<Workspace, DutError> {
    let ws = Workspace::from_env().map_err(|e| DutError::Runtime {
        message: e.to_string(),
        suggestion: Some("Set DUTRUN_HOME to a writable directory".to_string()),
    })?;
    ws.ensure()
        .map_err(|e| DutError::io(format!("Failed to create workspace: {}", e), ws.root()))?;
    Ok(ws)
}

fn load_config(ws: &Workspace, name: &str) -> Result<RunConfig, DutError> {
    let path = ws.config_path(name);
    parse_config_file(&path, name).map_err(|e| DutError::from(e).with_path(&path))
}

fn init_config(name: &str, force: bool) -> Result<ExitCode, DutError> {
    let ws = workspace()?;
    let path = ws.config_path(name);

    if path.exists() && !force {
        return Err(DutError::Config {
            message: format!("Configuration '{}' already exists", name),
            path: Some(path),
            suggestion: Some("Pass --force to overwrite it".to_string()),
        });
    }

    let yaml = default_config_yaml()?;
    fs::write(&path, yaml)
        .map_err(|e| DutError::io(format!("Failed to write configuration: {}", e), &path))?;

    println!(
        "{} {}",
        "Created".green().bold(),
        path.display().to_string().cyan()
    );
    println!("Edit the devices and commands, then run: dutrun run {}", name);
    Ok(ExitCode::SUCCESS)
}

fn show_logs(name: &str) -> Result<ExitCode, DutError> {
    let ws = workspace()?;
    let config = load_config(&ws, name)?;
    let output = TerminalOutput::new(false, false);

    let logs = ws.device_logs(&config);
    if logs.is_empty() {
        println!("No logs for '{}' yet. Run: dutrun run {}", name, name);
        return Ok(ExitCode::SUCCESS);
    }

    for path in logs {
        let content = fs::read_to_string(&path)
            .map_err(|e| DutError::io(format!("Failed to read log: {}", e), &path))?;
        output.print_log(&path, &parse_entries(&content));
    }
    Ok(ExitCode::SUCCESS)
}

struct RunOptions {
    yes: bool,
    forks: usize,
    timeout: u64,
    private_key: Option<String>,
    ask_pass: bool,
    format: OutputFormat,
    verbose: bool,
    quiet: bool,
}

async fn run_config(name: &str, options: RunOptions) -> Result<ExitCode, DutError> {
    let ws = workspace()?;
    let mut config = load_config(&ws, name)?;
    let json = options.format == OutputFormat::Json;
    let output = Arc::new(TerminalOutput::new(options.verbose, options.quiet || json));

    if options.ask_pass {
        let password = prompt_password("SSH password: ")?;
        for device in config.devices.iter_mut() {
            if device.credential.is_empty() {
                device.credential = password.as_str().into();
            }
        }
    }

    output.print_config(&config);

    if !options.yes {
        let proceed = output.confirm().map_err(|e| DutError::Runtime {
            message: format!("Failed to read confirmation: {}", e),
            suggestion: Some("Pass --yes to skip the prompt".to_string()),
        })?;
        if !proceed {
            return Err(DutError::Cancelled);
        }
    }

    let mut connector = SshConnector::new();
    if let Some(key) = options.private_key {
        connector = connector.with_private_key(key);
    }

    let orchestrator_config = OrchestratorConfig::default()
        .with_max_workers(options.forks)
        .with_connect_timeout(std::time::Duration::from_secs(options.timeout))
        .with_log_dir(ws.logs_dir());

    let (emitter, mut events) = create_event_channel();
    let orchestrator = Orchestrator::new(orchestrator_config, connector).with_events(emitter);

    let tracker = ProgressTracker::new(config.total_units());
    let bar = output.unit_progress(tracker.total());
    let follower = tokio::spawn(follow_progress(tracker.subscribe(), bar.clone()));

    let printer = {
        let output = output.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                output.print_event(&event);
            }
        })
    };

    let report = orchestrator.run(&config, &tracker).await;

    // Closing the last senders lets both background tasks drain and stop
    drop(orchestrator);
    drop(tracker);
    let _ = printer.await;
    let _ = follower.await;
    bar.finish_and_clear();

    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| DutError::runtime(format!("Failed to render report: {}", e)))?;
        println!("{}", rendered);
    } else {
        output.print_recap(&report);
    }

    Ok(if report.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn prompt_password(prompt: &str) -> Result<String, DutError> {
    // Print prompt to stderr so it appears even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    let password = rpassword::read_password().map_err(|e| DutError::Runtime {
        message: format!("Failed to read password: {}", e),
        suggestion: Some("Put the password in the configuration instead".to_string()),
    })?;

    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(DutError::runtime("Password cannot be empty"));
    }
    Ok(password)
}
