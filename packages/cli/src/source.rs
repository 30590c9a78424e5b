// ABOUTME: Resolves what to run from command line input: inline code, a file, or stdin
// ABOUTME: Infers the language from a file extension when none is given

use anyhow::{bail, Context, Result};
use orkee_workspaces::languages::{self, LanguageInfo};
use std::io::Read;
use std::path::Path;

/// Language whose registered extension matches the file, e.g. `main.py` -> python
pub fn language_for_path(path: &Path) -> Option<&'static LanguageInfo> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    languages::all()
        .iter()
        .find(|info| info.extension.trim_start_matches('.') == extension)
}

/// Source code from `--code`, a file path, or `-` for stdin
pub fn load_code(code: Option<String>, file: Option<&Path>, stdin: impl Read) -> Result<String> {
    match (code, file) {
        (Some(_), Some(_)) => bail!("pass either --code or a file, not both"),
        (Some(code), None) => Ok(code),
        (None, Some(path)) if path == Path::new("-") => {
            let mut code = String::new();
            let mut stdin = stdin;
            stdin
                .read_to_string(&mut code)
                .context("failed to read code from stdin")?;
            Ok(code)
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        (None, None) => bail!("nothing to run: pass --code, a file, or - to read stdin"),
    }
}

/// Canonical language id from `--language`, falling back to the file extension
pub fn resolve_language(language: Option<&str>, file: Option<&Path>) -> Result<&'static str> {
    if let Some(language) = language {
        return languages::resolve(language)
            .map(|info| info.id)
            .with_context(|| format!("unsupported language '{}'", language));
    }
    file.filter(|path| *path != Path::new("-"))
        .and_then(language_for_path)
        .map(|info| info.id)
        .context("cannot infer the language, pass --language")
}
