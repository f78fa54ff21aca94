mod config;
mod probe_cmd;
mod reset_cmd;
mod run_cmd;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use usercheck_core::HarnessConfig;
use usercheck_core::scenario::default_scenarios;

use config::CliOverrides;

#[derive(Parser)]
#[command(name = "usercheck", about = "Integration-test harness for a users CRUD service")]
struct Cli {
    /// Config file (default: ~/.config/usercheck/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL (overrides USERCHECK_BASE_URL env var)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (if needed), reset, test and tear down the service
    Run {
        /// Only run this scenario (repeatable)
        #[arg(long = "scenario", value_name = "NAME")]
        scenarios: Vec<String>,
        /// Program that starts the service when nothing is answering
        #[arg(long)]
        service_program: Option<String>,
        /// Interpreter for --service-program, e.g. python3
        #[arg(long)]
        service_interpreter: Option<String>,
        /// Argument passed to the service program (repeatable)
        #[arg(long = "service-arg", value_name = "ARG", allow_hyphen_values = true)]
        service_args: Vec<String>,
        /// Working directory of the service program
        #[arg(long)]
        service_dir: Option<PathBuf>,
        /// Cancel the whole run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Wait until the service answers
    Probe,
    /// Delete every user through the API
    Reset,
    /// List the built-in scenarios
    Scenarios,
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Execute the `usercheck init` command: write a starter config file.
fn cmd_init(path: PathBuf, base_url: Option<&str>, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let base_url = base_url.unwrap_or(HarnessConfig::DEFAULT_BASE_URL);
    config::save_config(&path, &config::starter_config(base_url))?;

    println!("Config written to {}", path.display());
    println!("  service.base_url = {base_url}");
    println!();
    println!("Edit [service] to point at your service's start command, then run `usercheck run`.");
    Ok(())
}

fn cmd_scenarios() {
    let scenarios = default_scenarios();
    let width = scenarios.iter().map(|s| s.name().len()).max().unwrap_or(0);
    for scenario in &scenarios {
        println!("{:<width$}  {}", scenario.name(), scenario.description());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut overrides = CliOverrides {
        base_url: cli.base_url.clone(),
        ..CliOverrides::default()
    };

    match cli.command {
        Commands::Run {
            scenarios,
            service_program,
            service_interpreter,
            service_args,
            service_dir,
            deadline_secs,
        } => {
            overrides.service_program = service_program;
            overrides.service_interpreter = service_interpreter;
            overrides.service_args = service_args;
            overrides.service_dir = service_dir;
            let resolved = config::resolve(cli.config.as_deref(), &overrides)?;
            let options = run_cmd::RunOptions {
                scenarios,
                deadline: deadline_secs.map(std::time::Duration::from_secs),
            };
            let outcome = run_cmd::run_harness(resolved, options).await?;
            std::process::exit(outcome.exit_code());
        }
        Commands::Probe => {
            let resolved = config::resolve(cli.config.as_deref(), &overrides)?;
            probe_cmd::run_probe(&resolved).await?;
        }
        Commands::Reset => {
            let resolved = config::resolve(cli.config.as_deref(), &overrides)?;
            reset_cmd::run_reset(&resolved).await?;
        }
        Commands::Scenarios => cmd_scenarios(),
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::config_path);
            cmd_init(path, cli.base_url.as_deref(), force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "usercheck", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that mutate process-wide environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
