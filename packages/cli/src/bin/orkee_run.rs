use clap::{Parser, Subcommand};
use colored::*;
use orkee_workspaces::{WorkspaceManager, WorkspaceSettings, WorkspaceType};
use std::process;

mod cli;

use cli::run::RunArgs;

#[derive(Parser)]
#[command(name = "orkee-run")]
#[command(about = "Run code through Orkee workspaces: local processes, Docker or a remote service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program once in a throwaway workspace
    Run(RunArgs),
    /// List known languages and which providers accept them
    Languages {
        /// Only show languages this provider accepts
        #[arg(long)]
        provider: Option<WorkspaceType>,
    },
    /// Show registered providers, their availability and capabilities
    Providers,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    orkee_cli::init_logging();

    let cli = Cli::parse();
    let settings = WorkspaceSettings::from_env();
    let manager = WorkspaceManager::from_settings(&settings).await;

    let outcome = match cli.command {
        Commands::Run(args) => cli::run::run(&manager, args).await,
        Commands::Languages { provider } => {
            cli::languages::list(&manager, provider).await.map(|_| 0)
        }
        Commands::Providers => cli::providers::list(&manager).await.map(|_| 0),
    };
    manager.cleanup().await;

    match outcome {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
