use clap::{Parser, Subcommand};
use logferry::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logferry")]
#[command(about = "Ship JSON log files to a collector", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files from the watch directory until Ctrl+C
    Producer,
    /// Receive and store batches until Ctrl+C
    Collector,
    /// List the log types known to a collector
    Types {
        #[arg(long)]
        url: Option<String>,
    },
    /// Download every record of one type
    Fetch {
        #[arg(long = "type")]
        log_type: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        url: Option<String>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logferry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Commands::Producer => logferry::cli::run::run_producer(config_path).await?,
        Commands::Collector => logferry::cli::run::run_collector(config_path).await?,
        Commands::Types { url } => logferry::cli::read::types(url, config_path).await?,
        Commands::Fetch { log_type, out, url } => {
            logferry::cli::read::fetch(&log_type, &out, url, config_path).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { stdout } => logferry::cli::config::init(stdout)?,
        },
    }

    Ok(())
}
