// ABOUTME: Environment driven configuration for the workspace manager and its providers
// ABOUTME: Provides parse helpers that fall back to defaults and warn about bad values

use crate::languages;
use crate::providers::docker::ContainerLimits;
use crate::providers::remote::{RemoteConfig, DEFAULT_REMOTE_URL};
use crate::providers::LocalProvider;
use crate::types::{WorkspaceType, DEFAULT_EXECUTION_TIMEOUT_SECS};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_DEFAULT_PROVIDER: &str = "ORKEE_WORKSPACE_DEFAULT_PROVIDER";
/// Comma separated provider types, most preferred first
pub const ENV_PRIORITY: &str = "ORKEE_WORKSPACE_PRIORITY";
pub const ENV_TIMEOUT_SECS: &str = "ORKEE_WORKSPACE_TIMEOUT_SECS";
pub const ENV_MEMORY_MB: &str = "ORKEE_WORKSPACE_MEMORY_MB";
pub const ENV_ENABLE_LOCAL: &str = "ORKEE_WORKSPACE_ENABLE_LOCAL";
pub const ENV_ENABLE_DOCKER: &str = "ORKEE_WORKSPACE_ENABLE_DOCKER";
pub const ENV_ROOT: &str = "ORKEE_WORKSPACE_ROOT";
/// JSON object of language id to image name
pub const ENV_DOCKER_IMAGES: &str = "ORKEE_WORKSPACE_DOCKER_IMAGES";
pub const ENV_DOCKER_NETWORK: &str = "ORKEE_WORKSPACE_DOCKER_NETWORK";
pub const ENV_DOCKER_PULL_TIMEOUT_SECS: &str = "ORKEE_WORKSPACE_DOCKER_PULL_TIMEOUT_SECS";
/// Empty disables the remote provider
pub const ENV_REMOTE_URL: &str = "ORKEE_REMOTE_EXEC_URL";
pub const ENV_REMOTE_URL_LEGACY: &str = "PISTON_API_URL";
pub const ENV_REMOTE_API_KEY: &str = "ORKEE_REMOTE_EXEC_API_KEY";
pub const ENV_REMOTE_TIMEOUT_SECS: &str = "ORKEE_REMOTE_EXEC_TIMEOUT_SECS";

/// Fixed fallback order when nothing else is configured
pub const DEFAULT_PRIORITY: [WorkspaceType; 3] = [
    WorkspaceType::Remote,
    WorkspaceType::Docker,
    WorkspaceType::Local,
];

/// Limits applied to one-shot executions that do not set their own
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDefaults {
    pub timeout_secs: u64,
    pub memory_limit_mb: Option<u64>,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            memory_limit_mb: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DockerSettings {
    pub enabled: bool,
    /// Per language image overrides, keyed by canonical id
    pub images: HashMap<String, String>,
    pub limits: ContainerLimits,
    pub pull_timeout: Duration,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            images: HashMap::new(),
            limits: ContainerLimits::default(),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSettings {
    pub default_provider: Option<WorkspaceType>,
    pub priority: Vec<WorkspaceType>,
    pub execution: ExecutionDefaults,
    pub local_enabled: bool,
    /// Host directory holding local and Docker workspace trees
    pub root: PathBuf,
    pub docker: DockerSettings,
    /// `None` when the remote service is disabled
    pub remote: Option<RemoteConfig>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            priority: DEFAULT_PRIORITY.to_vec(),
            execution: ExecutionDefaults::default(),
            local_enabled: true,
            root: LocalProvider::default_root(),
            docker: DockerSettings::default(),
            remote: Some(RemoteConfig::new(DEFAULT_REMOTE_URL)),
        }
    }
}

impl WorkspaceSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_provider = match std::env::var(ENV_DEFAULT_PROVIDER) {
            Ok(raw) if !raw.trim().is_empty() => match raw.parse::<WorkspaceType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("Ignoring {}: {}", ENV_DEFAULT_PROVIDER, e);
                    None
                }
            },
            _ => None,
        };

        let priority = std::env::var(ENV_PRIORITY)
            .ok()
            .map(|raw| parse_priority(&raw))
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.priority);

        let execution = ExecutionDefaults {
            timeout_secs: parse_env_or_default_with_validation(
                ENV_TIMEOUT_SECS,
                DEFAULT_EXECUTION_TIMEOUT_SECS,
                |v| v > 0 && v <= 3600,
            ),
            memory_limit_mb: std::env::var(ENV_MEMORY_MB)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0),
        };

        let root = std::env::var(ENV_ROOT)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.root);

        let mut limits = ContainerLimits::default();
        if let Ok(network) = std::env::var(ENV_DOCKER_NETWORK) {
            if !network.trim().is_empty() {
                limits.network_mode = network.trim().to_string();
            }
        }
        if let Some(memory_mb) = execution.memory_limit_mb {
            limits.memory_mb = memory_mb;
        }

        let docker = DockerSettings {
            enabled: parse_flag(ENV_ENABLE_DOCKER, true),
            images: std::env::var(ENV_DOCKER_IMAGES)
                .map(|raw| parse_image_overrides(&raw))
                .unwrap_or_default(),
            limits,
            pull_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                ENV_DOCKER_PULL_TIMEOUT_SECS,
                600,
                |v| v > 0,
            )),
        };

        Self {
            default_provider,
            priority,
            execution,
            local_enabled: parse_flag(ENV_ENABLE_LOCAL, true),
            root,
            docker,
            remote: remote_from_env(),
        }
    }
}

fn remote_from_env() -> Option<RemoteConfig> {
    let base_url = std::env::var(ENV_REMOTE_URL)
        .or_else(|_| std::env::var(ENV_REMOTE_URL_LEGACY))
        .unwrap_or_else(|_| DEFAULT_REMOTE_URL.to_string());
    if base_url.trim().is_empty() {
        return None;
    }

    let mut config = RemoteConfig::new(base_url.trim());
    config.api_key = std::env::var(ENV_REMOTE_API_KEY)
        .ok()
        .filter(|k| !k.trim().is_empty());
    config.request_timeout = Duration::from_secs(parse_env_or_default_with_validation(
        ENV_REMOTE_TIMEOUT_SECS,
        60,
        |v| v > 0,
    ));
    Some(config)
}

/// Provider types in the given order; unknown names are skipped, duplicates dropped
pub fn parse_priority(raw: &str) -> Vec<WorkspaceType> {
    let mut priority = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse::<WorkspaceType>() {
            Ok(t) if !priority.contains(&t) => priority.push(t),
            Ok(_) => {}
            Err(e) => warn!("Ignoring entry in {}: {}", ENV_PRIORITY, e),
        }
    }
    priority
}

/// Image overrides keyed by canonical language id. Aliases are accepted.
pub fn parse_image_overrides(raw: &str) -> HashMap<String, String> {
    let parsed: HashMap<String, String> = match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!("Ignoring {}: not a JSON object of strings: {}", ENV_DOCKER_IMAGES, e);
            return HashMap::new();
        }
    };

    parsed
        .into_iter()
        .filter_map(|(language, image)| match languages::resolve(&language) {
            Some(info) => Some((info.id.to_string(), image)),
            None => {
                warn!("Ignoring image override for unknown language '{}'", language);
                None
            }
        })
        .collect()
}

/// Boolean flag accepting true/false, 1/0, yes/no and on/off
pub fn parse_flag(var_name: &str, default: bool) -> bool {
    match std::env::var(var_name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!(
                    "Environment variable {} has invalid value '{}', using default: {}",
                    var_name, raw, default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse an environment variable with validation
/// Logs a warning when the variable is set but unparseable or rejected by `validator`
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.trim().parse::<T>() {
            Ok(parsed_value) if validator(parsed_value) => parsed_value,
            Ok(_) => {
                warn!(
                    "Environment variable {} has invalid value '{}', using default: {}",
                    var_name, raw_value, default
                );
                default
            }
            Err(_) => {
                warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name, raw_value, default
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_env_with_validation() {
        std::env::set_var("ORKEE_TEST_VALIDATED", "150");
        let result =
            parse_env_or_default_with_validation("ORKEE_TEST_VALIDATED", 100, |v| v > 0 && v <= 200);
        assert_eq!(result, 150);

        std::env::set_var("ORKEE_TEST_VALIDATED", "300");
        let result =
            parse_env_or_default_with_validation("ORKEE_TEST_VALIDATED", 100, |v| v > 0 && v <= 200);
        assert_eq!(result, 100);
        std::env::remove_var("ORKEE_TEST_VALIDATED");
    }

    #[test]
    fn test_parse_flag() {
        std::env::set_var("ORKEE_TEST_FLAG", "off");
        assert!(!parse_flag("ORKEE_TEST_FLAG", true));
        std::env::set_var("ORKEE_TEST_FLAG", "YES");
        assert!(parse_flag("ORKEE_TEST_FLAG", false));
        std::env::set_var("ORKEE_TEST_FLAG", "maybe");
        assert!(parse_flag("ORKEE_TEST_FLAG", true));
        std::env::remove_var("ORKEE_TEST_FLAG");
        assert!(!parse_flag("ORKEE_TEST_FLAG", false));
    }

    #[test]
    fn test_parse_priority_skips_unknown_and_duplicates() {
        assert_eq!(
            parse_priority("docker, piston,local,docker,quantum"),
            vec![
                WorkspaceType::Docker,
                WorkspaceType::Remote,
                WorkspaceType::Local
            ]
        );
        assert!(parse_priority(" , ").is_empty());
    }

    #[test]
    fn test_parse_image_overrides_canonicalizes_languages() {
        let images = parse_image_overrides(
            r#"{"py": "python:3.12-alpine", "golang": "golang:1.22", "klingon": "x"}"#,
        );
        assert_eq!(images.len(), 2);
        assert_eq!(images["python"], "python:3.12-alpine");
        assert_eq!(images["go"], "golang:1.22");

        assert!(parse_image_overrides("[1, 2]").is_empty());
    }

    // The only test reading the real ORKEE_WORKSPACE_* names, so nothing races it
    #[test]
    fn test_from_env() {
        let vars = [
            ENV_DEFAULT_PROVIDER,
            ENV_PRIORITY,
            ENV_TIMEOUT_SECS,
            ENV_MEMORY_MB,
            ENV_ENABLE_LOCAL,
            ENV_ROOT,
            ENV_DOCKER_NETWORK,
            ENV_REMOTE_URL,
            ENV_REMOTE_URL_LEGACY,
            ENV_REMOTE_API_KEY,
        ];
        for var in vars {
            std::env::remove_var(var);
        }

        let settings = WorkspaceSettings::from_env();
        assert_eq!(settings.priority, DEFAULT_PRIORITY.to_vec());
        assert_eq!(settings.execution.timeout_secs, DEFAULT_EXECUTION_TIMEOUT_SECS);
        assert_eq!(
            settings.remote.as_ref().map(|r| r.base_url.as_str()),
            Some(DEFAULT_REMOTE_URL)
        );

        std::env::set_var(ENV_DEFAULT_PROVIDER, "container");
        std::env::set_var(ENV_PRIORITY, "local,docker");
        std::env::set_var(ENV_TIMEOUT_SECS, "5");
        std::env::set_var(ENV_MEMORY_MB, "128");
        std::env::set_var(ENV_ENABLE_LOCAL, "false");
        std::env::set_var(ENV_ROOT, "/srv/workspaces");
        std::env::set_var(ENV_DOCKER_NETWORK, "bridge");
        std::env::set_var(ENV_REMOTE_URL_LEGACY, "http://piston.internal:2000/api/v2");
        std::env::set_var(ENV_REMOTE_API_KEY, "secret");

        let settings = WorkspaceSettings::from_env();
        assert_eq!(settings.default_provider, Some(WorkspaceType::Docker));
        assert_eq!(
            settings.priority,
            vec![WorkspaceType::Local, WorkspaceType::Docker]
        );
        assert_eq!(settings.execution.timeout_secs, 5);
        assert_eq!(settings.execution.memory_limit_mb, Some(128));
        assert!(!settings.local_enabled);
        assert_eq!(settings.root, PathBuf::from("/srv/workspaces"));
        assert_eq!(settings.docker.limits.network_mode, "bridge");
        assert_eq!(settings.docker.limits.memory_mb, 128);
        let remote = settings.remote.unwrap();
        assert_eq!(remote.base_url, "http://piston.internal:2000/api/v2");
        assert_eq!(remote.api_key.as_deref(), Some("secret"));

        // An empty URL switches the remote provider off
        std::env::set_var(ENV_REMOTE_URL, "");
        assert!(WorkspaceSettings::from_env().remote.is_none());

        for var in vars {
            std::env::remove_var(var);
        }
    }
}
