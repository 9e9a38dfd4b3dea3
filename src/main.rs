use clap::{Parser, Subcommand};
use glam::DVec3;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use regionweather::cli::commands;
use regionweather::config::SimulationConfig;
use regionweather::world::MapRegionKey;

#[derive(Parser)]
#[command(name = "regionweather")]
#[command(about = "Region-based weather simulation server with client-side spatial blending")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs and sample output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the weather server
    Run,

    /// Write a default config and weather pattern file
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Inspect saved region weather
    Inspect {
        /// Region key as "X,Z"
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Simulate offline and print the blended weather at a position
    Sample {
        #[arg(long, default_value_t = 0.0)]
        x: f64,
        #[arg(long, default_value_t = 130.0)]
        y: f64,
        #[arg(long, default_value_t = 0.0)]
        z: f64,
        /// Server ticks to simulate before sampling
        #[arg(long, default_value_t = 240)]
        ticks: u32,
    },

    /// Connect to a running server as a headless client
    Probe {
        #[arg(long, default_value = "ws://127.0.0.1:8119")]
        url: String,
        #[arg(long, default_value_t = 0.0)]
        x: f64,
        #[arg(long, default_value_t = 130.0)]
        y: f64,
        #[arg(long, default_value_t = 0.0)]
        z: f64,
        /// How long to stay connected
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn load_config(path: &str, required: bool) -> SimulationConfig {
    let path = Path::new(path);
    if !required && !path.exists() {
        return SimulationConfig::default();
    }
    match SimulationConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        if let Err(e) = commands::init(Path::new(&cli.config), force) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let required = matches!(cli.command, Commands::Run);
    let config = load_config(&cli.config, required);
    init_tracing(&config.log_level, cli.json);
    if !required && !Path::new(&cli.config).exists() {
        tracing::warn!(path = %cli.config, "Config file not found, using defaults");
    }

    let result = match cli.command {
        Commands::Run => commands::run_server(&config).await,
        Commands::Init { .. } => Ok(()),
        Commands::Inspect { region } => match region {
            Some(text) => match MapRegionKey::parse(&text) {
                Some(key) => commands::inspect(&config, Some(key)),
                None => Err(format!("Invalid region key {:?}, expected \"X,Z\"", text)),
            },
            None => commands::inspect(&config, None),
        },
        Commands::Sample { x, y, z, ticks } => {
            commands::sample(&config, DVec3::new(x, y, z), ticks, cli.json)
        }
        Commands::Probe {
            url,
            x,
            y,
            z,
            seconds,
        } => commands::probe(&config, &url, DVec3::new(x, y, z), seconds, cli.json).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
