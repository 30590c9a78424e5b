use anyhow::Result;
use colored::*;
use orkee_cli::render::{describe_support, providers_table, ProviderRow};
use orkee_workspaces::WorkspaceManager;

pub async fn list(manager: &WorkspaceManager) -> Result<()> {
    let providers = manager.providers().await;
    if providers.is_empty() {
        println!("{}", "No providers enabled".yellow());
        println!(
            "{}",
            "Set ORKEE_WORKSPACE_ENABLE_LOCAL=true or configure Docker or a remote service".dimmed()
        );
        return Ok(());
    }

    let default = manager.default_provider().await;
    let mut rows = Vec::with_capacity(providers.len());
    for provider in &providers {
        rows.push(ProviderRow {
            workspace_type: provider.workspace_type(),
            name: provider.name().to_string(),
            available: provider.is_available().await.unwrap_or(false),
            is_default: default == Some(provider.workspace_type()),
            languages: describe_support(&provider.supported_languages()),
            capabilities: provider.capabilities(),
        });
    }

    println!("{}", "Execution Providers".blue().bold());
    println!();
    println!("{}", providers_table(&rows));
    Ok(())
}
