// ABOUTME: `orkee-run run` executes one program through the workspace manager
// ABOUTME: Prints program output as it arrives with --stream, or once at the end

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use orkee_cli::render::{exit_code_for, summary_line};
use orkee_cli::source::{load_code, resolve_language};
use orkee_workspaces::types::OutputKind;
use orkee_workspaces::{ExecuteRequest, TerminalOutput, WorkspaceManager, WorkspaceType};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source file to run, or - to read the program from stdin
    pub file: Option<PathBuf>,

    /// Language id or alias, inferred from the file extension when omitted
    #[arg(short, long)]
    pub language: Option<String>,

    /// Inline source code instead of a file
    #[arg(short, long, conflicts_with = "file")]
    pub code: Option<String>,

    /// Text passed to the program on standard input
    #[arg(long)]
    pub stdin: Option<String>,

    /// Wall clock limit in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Memory limit in megabytes
    #[arg(long)]
    pub memory: Option<u64>,

    /// Provider to try first (local, docker, remote)
    #[arg(short, long)]
    pub provider: Option<WorkspaceType>,

    /// Environment variable for the program, as KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Print output while the program runs
    #[arg(long, conflicts_with = "json")]
    pub stream: bool,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,

    /// Arguments passed to the program, after `--`
    #[arg(last = true)]
    pub args: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Returns the exit code the CLI should terminate with
pub async fn run(manager: &WorkspaceManager, args: RunArgs) -> Result<i32> {
    let language = resolve_language(args.language.as_deref(), args.file.as_deref())?;
    let code = load_code(args.code, args.file.as_deref(), std::io::stdin())?;

    if let Some(provider) = args.provider {
        manager
            .set_default_provider(provider)
            .await
            .with_context(|| format!("{} provider is not enabled", provider))?;
    }

    let mut request = ExecuteRequest::new(language, code);
    request.stdin = args.stdin;
    request.timeout_secs = args.timeout;
    request.memory_limit_mb = args.memory;
    request.env = args.env.into_iter().collect();
    request.args = args.args;

    if args.stream {
        return stream(manager, &request).await;
    }

    let result = manager.execute_code(&request).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        print_summary(&summary_line(&result), result.is_success());
    }
    Ok(exit_code_for(&result))
}

async fn stream(manager: &WorkspaceManager, request: &ExecuteRequest) -> Result<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TerminalOutput>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.kind {
                OutputKind::Stdout => {
                    print!("{}", event.data);
                    let _ = std::io::stdout().flush();
                }
                OutputKind::Stderr => eprint!("{}", event.data),
                OutputKind::Exit => break,
            }
        }
    });

    let outcome = manager.execute_code_stream(request, tx).await;
    let _ = printer.await;

    let result = outcome?;
    print_summary(&summary_line(&result), result.is_success());
    Ok(exit_code_for(&result))
}

fn print_summary(summary: &str, success: bool) {
    if success {
        eprintln!("{}", summary.dimmed());
    } else {
        eprintln!("{}", summary.yellow());
    }
}
