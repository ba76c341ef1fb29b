//! meshloop CLI: the main entry point.
//!
//! Commands:
//! - `run`: Recreate a reference image in Blender from a prompt
//! - `tools`: List the tools the provider exposes

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod image;
mod progress;

#[derive(Parser)]
#[command(
    name = "meshloop",
    about = "meshloop: drive Blender through MCP tools from a prompt and an image",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.meshloop/config.toml)
    #[arg(short, long, global = true, env = "MESHLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tool-use loop for one image and prompt
    Run {
        /// Reference image (png, jpg, gif or webp)
        image: PathBuf,

        /// What to build
        prompt: String,

        /// Write the final conversation log as JSON
        #[arg(short, long)]
        transcript: Option<PathBuf>,

        /// Override the iteration cap from the config
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,
    },

    /// Connect to the tool provider and list its tools
    Tools,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the answer
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run {
            image,
            prompt,
            transcript,
            max_iterations,
        } => {
            commands::run::run(commands::run::RunArgs {
                config_path,
                image,
                prompt,
                transcript,
                max_iterations,
            })
            .await
        }
        Commands::Tools => commands::tools::run(config_path)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("  error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
