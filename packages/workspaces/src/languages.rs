// ABOUTME: Static language registry mapping identifiers and aliases to runtime metadata
// ABOUTME: Also holds per-backend tables: container images, remote runtimes and run commands

use crate::providers::ProviderError;
use crate::types::PackageManager;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    /// Canonical lowercase key
    pub id: &'static str,
    pub name: &'static str,
    /// Informational only; each backend pins its own runtime version
    pub version: &'static str,
    pub extension: &'static str,
    pub aliases: &'static [&'static str],
    pub package_manager: Option<PackageManager>,
}

const fn lang(
    id: &'static str,
    name: &'static str,
    version: &'static str,
    extension: &'static str,
    aliases: &'static [&'static str],
    package_manager: Option<PackageManager>,
) -> LanguageInfo {
    LanguageInfo {
        id,
        name,
        version,
        extension,
        aliases,
        package_manager,
    }
}

static LANGUAGES: &[LanguageInfo] = &[
    // Popular languages
    lang("python", "Python", "3.11", ".py", &["py", "python3"], Some(PackageManager::Pip)),
    lang("javascript", "JavaScript", "Node 20", ".js", &["js", "node", "nodejs"], Some(PackageManager::Npm)),
    lang("typescript", "TypeScript", "5.0", ".ts", &["ts"], Some(PackageManager::Npm)),
    lang("java", "Java", "17", ".java", &[], None),
    lang("cpp", "C++", "GCC 12", ".cpp", &["c++", "cxx"], None),
    lang("c", "C", "GCC 12", ".c", &[], None),
    lang("go", "Go", "1.21", ".go", &["golang"], Some(PackageManager::Go)),
    lang("rust", "Rust", "1.70", ".rs", &["rs"], Some(PackageManager::Cargo)),
    lang("ruby", "Ruby", "3.2", ".rb", &["rb"], Some(PackageManager::Gem)),
    lang("php", "PHP", "8.2", ".php", &[], Some(PackageManager::Composer)),
    // JVM, functional and scientific
    lang("kotlin", "Kotlin", "1.9", ".kt", &["kt"], None),
    lang("swift", "Swift", "5.9", ".swift", &[], None),
    lang("scala", "Scala", "3.3", ".scala", &[], None),
    lang("haskell", "Haskell", "GHC 9.4", ".hs", &["hs"], None),
    lang("lua", "Lua", "5.4", ".lua", &[], None),
    lang("perl", "Perl", "5.38", ".pl", &["pl"], None),
    lang("r", "R", "4.3", ".r", &["rlang", "rscript"], None),
    lang("julia", "Julia", "1.9", ".jl", &["jl"], None),
    lang("elixir", "Elixir", "1.15", ".exs", &["ex", "exs"], None),
    lang("erlang", "Erlang", "OTP 26", ".erl", &["erl"], None),
    lang("clojure", "Clojure", "1.11", ".clj", &["clj"], None),
    lang("dart", "Dart", "3.1", ".dart", &[], None),
    lang("groovy", "Groovy", "3.0", ".groovy", &["gvy"], None),
    lang("ocaml", "OCaml", "4.12", ".ml", &["ml"], None),
    lang("fsharp", "F#", ".NET 5", ".fs", &["fs", "f#"], None),
    lang("csharp", "C#", ".NET 5", ".cs", &["cs", "c#"], None),
    lang("visualbasic", "Visual Basic", ".NET 5", ".vb", &["vb", "basic"], None),
    lang("racket", "Racket", "8.3", ".rkt", &["rkt"], None),
    lang("lisp", "Common Lisp", "SBCL 2.1", ".lisp", &["commonlisp", "cl"], None),
    lang("prolog", "Prolog", "8.2", ".pro", &["swipl"], None),
    lang("octave", "Octave", "6.2", ".m", &["matlab"], None),
    // Systems
    lang("d", "D", "2.x", ".d", &["dlang"], None),
    lang("zig", "Zig", "0.10", ".zig", &[], None),
    lang("nim", "Nim", "1.6", ".nim", &[], None),
    lang("crystal", "Crystal", "1.0", ".cr", &["cr"], None),
    lang("fortran", "Fortran", "GFortran 10", ".f90", &["f90", "gfortran"], None),
    lang("cobol", "COBOL", "GnuCOBOL 3.1", ".cob", &["cob"], None),
    lang("pascal", "Pascal", "FPC 3.2", ".pas", &["pas", "freepascal"], None),
    lang("nasm", "Assembly (NASM)", "2.15", ".asm", &["asm", "assembly"], None),
    // Scripting and shells
    lang("bash", "Bash", "5.2", ".sh", &["sh", "shell"], None),
    lang("powershell", "PowerShell", "7.3", ".ps1", &["ps1", "pwsh"], None),
    lang("awk", "AWK", "5.1", ".awk", &["gawk"], None),
    lang("coffeescript", "CoffeeScript", "2.5", ".coffee", &["coffee"], Some(PackageManager::Npm)),
    lang("smalltalk", "Smalltalk", "GNU 3.2", ".st", &["st"], None),
    lang("forth", "Forth", "Gforth 0.7", ".fth", &["gforth"], None),
    lang("brainfuck", "Brainfuck", "2.7", ".bf", &["bf"], None),
    lang("sql", "SQL", "SQLite 3", ".sql", &["sqlite", "sqlite3"], None),
];

static BY_ALIAS: Lazy<HashMap<&'static str, &'static LanguageInfo>> = Lazy::new(|| {
    LANGUAGES
        .iter()
        .flat_map(|info| info.aliases.iter().map(move |alias| (*alias, info)))
        .collect()
});

static BY_ID: Lazy<HashMap<&'static str, &'static LanguageInfo>> =
    Lazy::new(|| LANGUAGES.iter().map(|info| (info.id, info)).collect());

/// Every registered language, in registry order
pub fn all() -> &'static [LanguageInfo] {
    LANGUAGES
}

/// Look up a language by alias or canonical id, ignoring case and surrounding whitespace
pub fn resolve(input: &str) -> Option<&'static LanguageInfo> {
    let normalized = input.trim().to_lowercase();
    BY_ALIAS
        .get(normalized.as_str())
        .or_else(|| BY_ID.get(normalized.as_str()))
        .copied()
}

/// Like [`resolve`], but an unknown language is an error rather than a silent default
pub fn resolve_or_err(input: &str) -> Result<&'static LanguageInfo, ProviderError> {
    resolve(input).ok_or_else(|| {
        ProviderError::UnsupportedLanguage(format!(
            "'{}' is not a recognised language",
            input.trim()
        ))
    })
}

pub fn is_supported(input: &str) -> bool {
    resolve(input).is_some()
}

/// Interpreter invocation that takes the code as a command-line argument
pub fn inline_command(id: &str, code: &str) -> Option<(&'static str, Vec<String>)> {
    let (program, flags): (&'static str, Vec<&str>) = match id {
        "python" => ("python3", vec!["-c"]),
        "javascript" => ("node", vec!["-e"]),
        "typescript" => ("npx", vec!["ts-node", "-e"]),
        "ruby" => ("ruby", vec!["-e"]),
        "php" => ("php", vec!["-r"]),
        "perl" => ("perl", vec!["-e"]),
        "lua" => ("lua", vec!["-e"]),
        "bash" => ("bash", vec!["-c"]),
        "r" => ("Rscript", vec!["-e"]),
        "powershell" => ("pwsh", vec!["-Command"]),
        _ => return None,
    };

    let mut args: Vec<String> = flags.into_iter().map(String::from).collect();
    args.push(code.to_string());
    Some((program, args))
}

/// How to run a language that needs its source on disk: the file to write
/// and a `sh` script, run from the file's directory, that builds and runs it.
/// The script forwards its positional parameters to the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub file_name: &'static str,
    pub script: &'static str,
}

pub fn source_plan(id: &str) -> Option<SourcePlan> {
    let (file_name, script) = match id {
        "c" => ("main.c", r#"gcc -O2 -o main main.c -lm && ./main "$@""#),
        "cpp" => (
            "main.cpp",
            r#"g++ -O2 -std=c++17 -o main main.cpp && ./main "$@""#,
        ),
        "go" => ("main.go", r#"go run main.go "$@""#),
        "rust" => ("main.rs", r#"rustc -O -o main main.rs && ./main "$@""#),
        "java" => ("Main.java", r#"java Main.java "$@""#),
        "haskell" => ("main.hs", r#"runghc main.hs "$@""#),
        "julia" => ("main.jl", r#"julia main.jl "$@""#),
        "elixir" => ("main.exs", r#"elixir main.exs "$@""#),
        "dart" => ("main.dart", r#"dart run main.dart "$@""#),
        _ => return None,
    };
    Some(SourcePlan { file_name, script })
}

/// True when a backend with a filesystem knows how to run this language
pub fn has_run_command(id: &str) -> bool {
    inline_command(id, "").is_some() || source_plan(id).is_some()
}

static DOCKER_IMAGES: &[(&str, &str)] = &[
    ("python", "python:3.11-slim"),
    ("javascript", "node:20-slim"),
    ("typescript", "node:20-slim"),
    ("java", "openjdk:17-slim"),
    ("cpp", "gcc:12"),
    ("c", "gcc:12"),
    ("go", "golang:1.21-alpine"),
    ("rust", "rust:1.70-slim"),
    ("ruby", "ruby:3.2-slim"),
    ("php", "php:8.2-cli"),
    ("kotlin", "openjdk:17-slim"),
    ("scala", "hseeberger/scala-sbt:17.0.2_1.6.2_3.1.1"),
    ("haskell", "haskell:9.4"),
    ("lua", "nickblah/lua:5.4"),
    ("perl", "perl:5.38"),
    ("r", "r-base:4.3.0"),
    ("julia", "julia:1.9"),
    ("elixir", "elixir:1.15"),
    ("erlang", "erlang:26"),
    ("clojure", "clojure:openjdk-17-tools-deps"),
    ("dart", "dart:stable"),
    ("bash", "bash:5.2"),
];

/// Default container image for a canonical language id
pub fn docker_image(id: &str) -> Option<&'static str> {
    DOCKER_IMAGES
        .iter()
        .find(|(lang, _)| *lang == id)
        .map(|(_, image)| *image)
}

pub fn docker_images() -> impl Iterator<Item = (&'static str, &'static str)> {
    DOCKER_IMAGES.iter().copied()
}

/// Runtime name and version understood by the remote execution service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteRuntime {
    pub language: &'static str,
    pub version: &'static str,
}

static REMOTE_RUNTIMES: &[(&str, RemoteRuntime)] = &[
    ("python", RemoteRuntime { language: "python", version: "3.10.0" }),
    ("javascript", RemoteRuntime { language: "javascript", version: "18.15.0" }),
    ("typescript", RemoteRuntime { language: "typescript", version: "5.0.3" }),
    ("java", RemoteRuntime { language: "java", version: "15.0.2" }),
    ("cpp", RemoteRuntime { language: "c++", version: "10.2.0" }),
    ("c", RemoteRuntime { language: "c", version: "10.2.0" }),
    ("go", RemoteRuntime { language: "go", version: "1.16.2" }),
    ("rust", RemoteRuntime { language: "rust", version: "1.68.2" }),
    ("ruby", RemoteRuntime { language: "ruby", version: "3.0.1" }),
    ("php", RemoteRuntime { language: "php", version: "8.2.3" }),
    ("kotlin", RemoteRuntime { language: "kotlin", version: "1.8.20" }),
    ("swift", RemoteRuntime { language: "swift", version: "5.3.3" }),
    ("scala", RemoteRuntime { language: "scala", version: "3.2.2" }),
    ("haskell", RemoteRuntime { language: "haskell", version: "9.0.1" }),
    ("lua", RemoteRuntime { language: "lua", version: "5.4.4" }),
    ("perl", RemoteRuntime { language: "perl", version: "5.36.0" }),
    ("r", RemoteRuntime { language: "rscript", version: "4.1.1" }),
    ("julia", RemoteRuntime { language: "julia", version: "1.8.5" }),
    ("elixir", RemoteRuntime { language: "elixir", version: "1.11.3" }),
    ("erlang", RemoteRuntime { language: "erlang", version: "23.0" }),
    ("clojure", RemoteRuntime { language: "clojure", version: "1.10.3" }),
    ("dart", RemoteRuntime { language: "dart", version: "2.19.6" }),
    ("groovy", RemoteRuntime { language: "groovy", version: "3.0.7" }),
    ("ocaml", RemoteRuntime { language: "ocaml", version: "4.12.0" }),
    ("fsharp", RemoteRuntime { language: "fsharp.net", version: "5.0.201" }),
    ("csharp", RemoteRuntime { language: "csharp.net", version: "5.0.201" }),
    ("visualbasic", RemoteRuntime { language: "basic.net", version: "5.0.201" }),
    ("racket", RemoteRuntime { language: "racket", version: "8.3.0" }),
    ("lisp", RemoteRuntime { language: "lisp", version: "2.1.2" }),
    ("prolog", RemoteRuntime { language: "prolog", version: "8.2.4" }),
    ("octave", RemoteRuntime { language: "octave", version: "6.2.0" }),
    ("d", RemoteRuntime { language: "d", version: "10.2.0" }),
    ("zig", RemoteRuntime { language: "zig", version: "0.10.1" }),
    ("nim", RemoteRuntime { language: "nim", version: "1.6.2" }),
    ("crystal", RemoteRuntime { language: "crystal", version: "0.36.1" }),
    ("fortran", RemoteRuntime { language: "fortran", version: "10.2.0" }),
    ("cobol", RemoteRuntime { language: "cobol", version: "3.1.2" }),
    ("pascal", RemoteRuntime { language: "pascal", version: "3.2.2" }),
    ("nasm", RemoteRuntime { language: "nasm", version: "2.15.5" }),
    ("bash", RemoteRuntime { language: "bash", version: "5.2.0" }),
    ("powershell", RemoteRuntime { language: "powershell", version: "7.1.4" }),
    ("awk", RemoteRuntime { language: "awk", version: "5.1.0" }),
    ("coffeescript", RemoteRuntime { language: "coffeescript", version: "2.5.1" }),
    ("smalltalk", RemoteRuntime { language: "smalltalk", version: "3.2.3" }),
    ("forth", RemoteRuntime { language: "forth", version: "0.7.3" }),
    ("brainfuck", RemoteRuntime { language: "brainfuck", version: "2.7.3" }),
    ("sql", RemoteRuntime { language: "sqlite3", version: "3.36.0" }),
];

pub fn remote_runtime(id: &str) -> Option<RemoteRuntime> {
    REMOTE_RUNTIMES
        .iter()
        .find(|(lang, _)| *lang == id)
        .map(|(_, runtime)| *runtime)
}

pub fn remote_languages() -> impl Iterator<Item = &'static str> {
    REMOTE_RUNTIMES.iter().map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    #[case("python", "python")]
    #[case("PY", "python")]
    #[case("  Python3 ", "python")]
    #[case("node", "javascript")]
    #[case("ts", "typescript")]
    #[case("c++", "cpp")]
    #[case("golang", "go")]
    #[case("sh", "bash")]
    #[case("C#", "csharp")]
    #[case("f#", "fsharp")]
    #[case("sqlite", "sql")]
    #[case("rscript", "r")]
    fn test_resolve_aliases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(resolve(input).map(|l| l.id), Some(expected));
    }

    #[test]
    fn test_unknown_language_is_an_error() {
        assert!(resolve("klingon").is_none());
        let err = resolve_or_err("klingon").unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedLanguage(_)));
        assert!(resolve("").is_none());
    }

    #[test]
    fn test_registry_is_consistent() {
        assert!(all().len() >= 45);

        let ids: HashSet<_> = all().iter().map(|l| l.id).collect();
        assert_eq!(ids.len(), all().len(), "duplicate language id");

        let mut seen = HashSet::new();
        for info in all() {
            assert_eq!(info.id, info.id.to_lowercase());
            assert!(info.extension.starts_with('.'));
            for alias in info.aliases {
                assert!(seen.insert(*alias), "alias {} registered twice", alias);
                assert_eq!(resolve(alias).map(|l| l.id), Some(info.id));
            }
        }
    }

    #[test]
    fn test_backend_tables_only_use_registered_ids() {
        for (id, _) in docker_images() {
            assert!(BY_ID.contains_key(id), "docker table uses unknown id {}", id);
        }
        for id in remote_languages() {
            assert!(BY_ID.contains_key(id), "remote table uses unknown id {}", id);
        }
    }

    #[test]
    fn test_remote_table_maps_service_names() {
        assert_eq!(remote_runtime("cpp").unwrap().language, "c++");
        assert_eq!(remote_runtime("r").unwrap().language, "rscript");
        assert_eq!(remote_runtime("sql").unwrap().language, "sqlite3");
        assert_eq!(remote_runtime("python").unwrap().version, "3.10.0");
        assert!(remote_runtime("klingon").is_none());
    }

    #[test]
    fn test_inline_commands() {
        let (program, args) = inline_command("python", "print(1)").unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["-c", "print(1)"]);

        let (program, args) = inline_command("typescript", "1").unwrap();
        assert_eq!(program, "npx");
        assert_eq!(args, vec!["ts-node", "-e", "1"]);

        assert!(inline_command("c", "int main(){}").is_none());
    }

    #[test]
    fn test_compiled_languages_have_source_plans() {
        for id in ["c", "cpp", "go", "rust", "java"] {
            let plan = source_plan(id).unwrap();
            assert!(plan.script.contains(plan.file_name));
            assert!(inline_command(id, "").is_none());
        }
        assert!(source_plan("python").is_none());
        assert!(has_run_command("python"));
        assert!(!has_run_command("cobol"));
    }
}
