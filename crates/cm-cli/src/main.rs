mod commands;

use clap::{Parser, Subcommand};

/// colimator CLI -- run colima/docker commands the way the desktop app does.
#[derive(Parser)]
#[command(name = "cm", version, about)]
struct Cli {
    /// Config file (defaults to ~/.colimator/config.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command to completion and print its output.
    Exec {
        /// Executable name or path.
        executable: String,
        /// Arguments passed through unchanged.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Wall-clock timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Follow a long-running command line by line (Ctrl-C to stop).
    Tail {
        /// Executable name or path.
        executable: String,
        /// Arguments passed through unchanged.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Split a leading timestamp off each line (for `docker logs -t`).
        #[arg(long)]
        timestamps: bool,
    },

    /// Open an interactive shell inside a container.
    Shell {
        /// Container id or name.
        container: String,
        /// Colima profile the container runs under.
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    cm_telemetry::logging::init_from_config("cm-cli", &config.logging);

    let code = match cli.command {
        Commands::Exec {
            executable,
            args,
            timeout,
            json,
        } => commands::exec::run(&config, executable, args, timeout, json).await?,
        Commands::Tail {
            executable,
            args,
            timestamps,
        } => commands::tail::run(&config, executable, args, timestamps).await?,
        Commands::Shell { container, profile } => commands::shell::run(&config, container, profile).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
