// ABOUTME: Table and summary rendering for the orkee-run subcommands
// ABOUTME: Also maps execution results onto process exit codes

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use orkee_workspaces::{
    ExecuteResult, ExecutionStatus, LanguageInfo, LanguageSupport, ProviderCapabilities,
    WorkspaceType,
};

/// Exit code conventionally used by `timeout(1)`
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Process exit code for the CLI after running a program
pub fn exit_code_for(result: &ExecuteResult) -> i32 {
    match result.status {
        ExecutionStatus::Success => 0,
        ExecutionStatus::Timeout => TIMEOUT_EXIT_CODE,
        ExecutionStatus::Error => match result.exit_code {
            Some(code) if (1..=255).contains(&code) => code as i32,
            _ => 1,
        },
    }
}

/// One line summary printed after a run, e.g. `success | exit 0 | 12 ms`
pub fn summary_line(result: &ExecuteResult) -> String {
    let mut parts = vec![result.status.to_string()];
    match (&result.exit_code, &result.signal) {
        (Some(code), _) => parts.push(format!("exit {}", code)),
        (None, Some(signal)) => parts.push(format!("signal {}", signal)),
        (None, None) => {}
    }
    parts.push(format!("{} ms", result.execution_time_ms));
    parts.join(" | ")
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn mark(flag: bool) -> String {
    if flag { "yes" } else { "-" }.to_string()
}

/// Language registry with one column per registered provider
pub fn languages_table(
    languages: &[&LanguageInfo],
    providers: &[(WorkspaceType, LanguageSupport)],
) -> Table {
    let mut table = new_table();
    let mut header = vec![
        "ID".to_string(),
        "Name".to_string(),
        "Version".to_string(),
        "Aliases".to_string(),
    ];
    header.extend(providers.iter().map(|(t, _)| t.to_string()));
    table.set_header(header);

    for info in languages {
        let mut row = vec![
            info.id.to_string(),
            info.name.to_string(),
            info.version.to_string(),
            if info.aliases.is_empty() {
                "-".to_string()
            } else {
                info.aliases.join(", ")
            },
        ];
        row.extend(
            providers
                .iter()
                .map(|(_, support)| mark(support.supports(info.id))),
        );
        table.add_row(row);
    }
    table
}

pub fn describe_support(support: &LanguageSupport) -> String {
    match support {
        LanguageSupport::All => "all".to_string(),
        LanguageSupport::Only(ids) => format!("{} languages", ids.len()),
    }
}

/// What the `providers` subcommand knows about one registered provider
#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub workspace_type: WorkspaceType,
    pub name: String,
    pub available: bool,
    pub is_default: bool,
    pub languages: String,
    pub capabilities: ProviderCapabilities,
}

pub fn providers_table(rows: &[ProviderRow]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        "Type",
        "Name",
        "Available",
        "Languages",
        "Files",
        "Packages",
        "Streaming",
        "Isolated network",
    ]);

    for row in rows {
        let workspace_type = if row.is_default {
            format!("{} (default)", row.workspace_type)
        } else {
            row.workspace_type.to_string()
        };
        table.add_row(vec![
            workspace_type,
            row.name.clone(),
            mark(row.available),
            row.languages.clone(),
            mark(row.capabilities.file_system),
            mark(row.capabilities.package_management),
            mark(row.capabilities.native_streaming),
            mark(row.capabilities.network_isolation),
        ]);
    }
    table
}
