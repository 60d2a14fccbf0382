use crate::helpers::load_config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fabric-node",
    about = "Inference-serving dispatch fabric",
    long_about = "fabric-node routes gRPC inference requests through a topic-keyed broker to pools of worker processes.",
    version,
    term_width = 100,
    color = clap::ColorChoice::Always,
    after_help = "\
    EXAMPLES:
        fabric-node supervise --config /etc/fabric-node.toml
        fabric-node validate --config ./fabric-node.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration, then spawn and supervise the server and worker processes
    Supervise {
        #[arg(short, long, default_value = "/etc/fabric-node.toml")]
        config: PathBuf,
    },

    /// Run the gRPC server process (broker, routers, RPC servicer). Normally
    /// spawned by `supervise`; can be run directly for local testing.
    Serve {
        #[arg(short, long, default_value = "/etc/fabric-node.toml")]
        config: PathBuf,
    },

    /// Run a single worker process for one configured topic. Normally
    /// spawned by `supervise`; can be run directly for local testing.
    Work {
        #[arg(short, long, default_value = "/etc/fabric-node.toml")]
        config: PathBuf,

        #[arg(short, long)]
        topic: String,
    },

    /// Validate the configuration file without starting anything
    Validate {
        #[arg(short, long, default_value = "/etc/fabric-node.toml")]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

/// Entry function for CLI. Owns the tracing worker guard for the lifetime of
/// whichever subcommand runs, since `main` never initializes tracing itself
/// - the log directory and level are configuration-file values.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Supervise { config } => {
            let cfg = Config::load(&config)?;
            let _guard = crate::instrumentation::tracing::init_tracing(&cfg.log_dir, &cfg.log_level);
            crate::supervisor::supervisor::run(config)?;
        }
        Commands::Serve { config } => {
            let cfg = Config::load(&config)?;
            let _guard = crate::instrumentation::tracing::init_tracing(&cfg.log_dir, &cfg.log_level);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(crate::runtime::runtime::run_server(cfg))?;
        }
        Commands::Work { config, topic } => {
            let cfg = Config::load(&config)?;
            let _guard = crate::instrumentation::tracing::init_tracing(&cfg.log_dir, &cfg.log_level);
            let topic_cfg = cfg
                .embedder_model_configs
                .into_iter()
                .find(|t| t.target_topic == topic)
                .ok_or_else(|| anyhow::anyhow!("no topic named {topic:?} in configuration"))?;
            crate::worker::runner::run(topic_cfg)?;
        }
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

/// Validate configuration file
fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config);
    let cfg = Config::load(&config)?;
    crate::supervisor::validate::validate_addresses(&cfg)?;
    println!("Configuration valid:\n{:#?}", cfg);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("fabric-node {}", env!("CARGO_PKG_VERSION"));
}
