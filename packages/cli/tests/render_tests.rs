// ABOUTME: Tests for orkee-run rendering, exit codes and source resolution
// ABOUTME: Exercises the library half of the CLI without spawning the binary

use orkee_cli::render::{
    describe_support, exit_code_for, languages_table, providers_table, summary_line, ProviderRow,
    TIMEOUT_EXIT_CODE,
};
use orkee_cli::source::{load_code, resolve_language};
use orkee_workspaces::languages;
use orkee_workspaces::{ExecuteResult, LanguageSupport, ProviderCapabilities, WorkspaceType};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::io::Cursor;
use tempfile::TempDir;

#[rstest]
#[case(Some(0), 0)]
#[case(Some(3), 3)]
#[case(Some(-1), 1)]
#[case(Some(300), 1)]
#[case(None, 1)]
fn test_exit_code_follows_program(#[case] exit_code: Option<i64>, #[case] expected: i32) {
    let result = ExecuteResult::from_exit(String::new(), String::new(), exit_code, 5);
    assert_eq!(exit_code_for(&result), expected);
}

#[test]
fn test_timeout_exit_code_and_summary() {
    let result = ExecuteResult::timeout(
        "partial".to_string(),
        String::new(),
        2000,
        Some("SIGKILL".to_string()),
    );
    assert_eq!(exit_code_for(&result), TIMEOUT_EXIT_CODE);
    assert_eq!(summary_line(&result), "timeout | signal SIGKILL | 2000 ms");

    let ok = ExecuteResult::from_exit("hi\n".to_string(), String::new(), Some(0), 12);
    assert_eq!(summary_line(&ok), "success | exit 0 | 12 ms");
}

#[test]
fn test_languages_table_marks_support_per_provider() {
    let rows = vec![
        languages::resolve("python").unwrap(),
        languages::resolve("cobol").unwrap(),
    ];
    let providers = vec![
        (WorkspaceType::Local, LanguageSupport::All),
        (
            WorkspaceType::Docker,
            LanguageSupport::Only(vec!["python".to_string()]),
        ),
    ];

    let rendered = languages_table(&rows, &providers).to_string();
    assert!(rendered.contains("Python"));
    assert!(rendered.contains("py, python3"));
    assert!(rendered.contains("docker"));

    let cobol_line = rendered.lines().find(|l| l.contains("COBOL")).unwrap();
    assert!(cobol_line.contains("yes"));
    assert!(cobol_line.contains('-'));
}

#[test]
fn test_providers_table_flags_default() {
    let rows = vec![ProviderRow {
        workspace_type: WorkspaceType::Remote,
        name: "Remote Execution Service".to_string(),
        available: false,
        is_default: true,
        languages: describe_support(&LanguageSupport::Only(vec!["python".to_string()])),
        capabilities: ProviderCapabilities {
            package_management: false,
            file_system: false,
            native_streaming: false,
            network_isolation: true,
        },
    }];

    let rendered = providers_table(&rows).to_string();
    assert!(rendered.contains("remote (default)"));
    assert!(rendered.contains("1 languages"));
    assert_eq!(describe_support(&LanguageSupport::All), "all");
}

#[test]
fn test_language_resolution_from_flags_and_files() {
    assert_eq!(resolve_language(Some("Py"), None).unwrap(), "python");
    assert_eq!(
        resolve_language(None, Some(std::path::Path::new("hello.go"))).unwrap(),
        "go"
    );
    assert!(resolve_language(None, Some(std::path::Path::new("-"))).is_err());
    assert!(resolve_language(Some("klingon"), None).is_err());
}

#[test]
fn test_load_code_reads_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("main.sh");
    std::fs::write(&path, "echo from file").unwrap();

    assert_eq!(
        load_code(None, Some(&path), Cursor::new("")).unwrap(),
        "echo from file"
    );
    assert!(load_code(None, Some(&dir.path().join("missing.sh")), Cursor::new("")).is_err());
}
