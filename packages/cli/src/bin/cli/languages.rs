use anyhow::{bail, Result};
use colored::*;
use orkee_cli::render::languages_table;
use orkee_workspaces::languages;
use orkee_workspaces::{WorkspaceManager, WorkspaceType};

pub async fn list(manager: &WorkspaceManager, only: Option<WorkspaceType>) -> Result<()> {
    let providers: Vec<_> = manager
        .providers()
        .await
        .iter()
        .filter(|p| only.map_or(true, |t| p.workspace_type() == t))
        .map(|p| (p.workspace_type(), p.supported_languages()))
        .collect();

    if let Some(wanted) = only {
        if providers.is_empty() {
            bail!("{} provider is not enabled", wanted);
        }
    }

    let rows: Vec<_> = languages::all()
        .iter()
        .filter(|info| {
            only.is_none() || providers.iter().any(|(_, support)| support.supports(info.id))
        })
        .collect();

    println!("{}", "Languages".blue().bold());
    println!();
    println!("{}", languages_table(&rows, &providers));
    println!("Total: {} languages", rows.len().to_string().cyan());
    Ok(())
}
