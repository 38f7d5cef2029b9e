use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use swapenv_core::config::Settings;
use swapenv_core::dotenv::ALL_ENVIRONMENTS;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod prompt;

/// swapenv - keep every environment of a project, switch between them, share them
#[derive(Parser)]
#[command(name = "swapenv")]
#[command(about = "Versioned environment files per project, shared end-to-end encrypted", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/swapenv/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the registry, snapshots and credentials
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// swapenv server URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load .<env>.env files into a new version and remove them
    Load {
        /// Environment to load, `*` for all
        #[arg(long, default_value = ALL_ENVIRONMENTS)]
        env: String,
    },

    /// Switch the working .env to an environment
    To {
        env: String,

        /// Replace the existing .env instead of merging into it
        #[arg(long)]
        replace: bool,

        /// Do not append the common environment
        #[arg(long)]
        skip_common: bool,
    },

    /// Write environments of the current version as .<env>.env files
    Spit {
        /// Environment to write, `*` for all
        #[arg(long, default_value = ALL_ENVIRONMENTS)]
        env: String,
    },

    /// List environments of the current project
    Ls,

    /// Map the current directory to an existing project
    Map { project: String },

    /// Show versions, or switch to the version named by TOKEN
    #[command(args_conflicts_with_subcommands = true)]
    Version {
        /// Version number, label, or `latest`
        token: Option<String>,

        #[command(subcommand)]
        action: Option<VersionCommand>,
    },

    /// Print the current project and environment
    Info {
        #[arg(long, value_enum, default_value_t = InfoFormat::Plain)]
        format: InfoFormat,

        /// Print only the environment name
        #[arg(long)]
        env_only: bool,
    },

    /// Log in with a device code
    Login,

    /// Forget the stored credential
    Logout,

    /// Share environments with another device
    Share {
        /// Project to share (default: the current one)
        #[arg(long)]
        project: Option<String>,

        /// Environment to share (default: all)
        #[arg(long)]
        env: Option<String>,

        /// Version number, label, or `latest` (default: current)
        #[arg(long)]
        version: Option<String>,
    },

    /// Receive environments shared from another device
    Receive,
}

#[derive(Subcommand)]
enum VersionCommand {
    /// List all versions
    Ls,

    /// Label a version
    Rename { version: String, name: String },

    /// Step back to an earlier version
    Rollback {
        #[arg(default_value_t = 1)]
        steps: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InfoFormat {
    Plain,
    Json,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings =
        Settings::discover(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(home) = cli.home {
        settings.home_directory = Some(home);
    }
    if let Some(server) = cli.server {
        settings.server_url = server;
    }

    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let app = commands::App::new(settings, cwd);

    match cli.command {
        Commands::Load { env } => app.load(&env),
        Commands::To {
            env,
            replace,
            skip_common,
        } => app.switch(&env, replace, skip_common),
        Commands::Spit { env } => app.spit(&env),
        Commands::Ls => app.list_environments(),
        Commands::Map { project } => app.map(&project),
        Commands::Version { token, action } => match action {
            Some(VersionCommand::Ls) => app.list_versions(),
            Some(VersionCommand::Rename { version, name }) => app.rename_version(&version, &name),
            Some(VersionCommand::Rollback { steps }) => app.rollback(steps),
            None => app.version(token.as_deref()),
        },
        Commands::Info { format, env_only } => {
            app.info(matches!(format, InfoFormat::Json), env_only)
        }
        Commands::Login => app.login().await,
        Commands::Logout => app.logout(),
        Commands::Share {
            project,
            env,
            version,
        } => {
            app.share(project.as_deref(), env.as_deref(), version.as_deref())
                .await
        }
        Commands::Receive => app.receive().await,
    }
}
