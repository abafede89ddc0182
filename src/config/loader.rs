// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::mcp::config::RemoteServerConfig;

use super::types::{SecurityConfigPartial, WorkspaceConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    "tether.json",
    ".tether.json",
    ".tether/config.json",
    "tether.yaml",
    "tether.yml",
];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".tether.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".tether";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.tether/config.json.
pub fn load_global_config() -> Result<Option<(PathBuf, WorkspaceConfig)>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };
    load_if_exists(path)
}

/// Load workspace configuration from the workspace root.
///
/// The first file of [`CONFIG_FILES`] that exists wins.
pub fn load_workspace_config(
    workspace_root: &Path,
) -> Result<Option<(PathBuf, WorkspaceConfig)>, ConfigError> {
    for filename in CONFIG_FILES {
        if let Some(found) = load_if_exists(workspace_root.join(filename))? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Load local configuration from .tether.local.json.
pub fn load_local_config(
    workspace_root: &Path,
) -> Result<Option<(PathBuf, WorkspaceConfig)>, ConfigError> {
    load_if_exists(workspace_root.join(LOCAL_CONFIG_FILE))
}

fn load_if_exists(path: PathBuf) -> Result<Option<(PathBuf, WorkspaceConfig)>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let config = load_config_file(&path)?;
    tracing::debug!(path = %path.display(), "Loaded config file");
    Ok(Some((path, config)))
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let parsed = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    };
    parsed.map_err(|e| ConfigError::InvalidFormat(format!("{}: {e}", path.display())))
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with default or provided configuration.
///
/// Refuses to overwrite an existing file.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let target = workspace_root.join(CONFIG_FILES[0]);
    if target.exists() {
        return Err(ConfigError::invalid(
            "init",
            format!("{} already exists", target.display()),
        ));
    }
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        if CONFIG_FILES.iter().any(|f| current.join(f).is_file()) {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        servers: Some(vec![
            RemoteServerConfig::npx("filesystem", "@modelcontextprotocol/server-filesystem")
                .with_args(["."]),
            RemoteServerConfig::uvx("fetch", "mcp-server-fetch"),
            RemoteServerConfig::https("search", "https://mcp.example.com/v1")
                .with_bearer_token("${SEARCH_API_TOKEN}")
                .with_auto_start(false),
        ]),
        auto_reconnect: Some(true),
        max_reconnect_attempts: Some(3),
        security: Some(SecurityConfigPartial::defaults()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::TransportKind;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 5);
        assert_eq!(CONFIG_FILES[0], "tether.json");
    }

    #[test]
    fn test_global_config_dir() {
        if let Some(dir) = get_global_config_dir() {
            assert!(dir.ends_with(".tether"));
        }
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".tether.json"),
            r#"{"servers": [{"name": "fs", "transport": "npx", "command": "pkg"}]}"#,
        )
        .unwrap();

        let (path, config) = load_workspace_config(temp.path()).unwrap().unwrap();
        assert!(path.ends_with(".tether.json"));
        assert_eq!(config.servers.unwrap()[0].name, "fs");
    }

    #[test]
    fn test_load_workspace_config_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("tether.yaml"),
            "servers:\n  - name: docs\n    transport: sse\n    url: http://localhost:3000/sse\n",
        )
        .unwrap();

        let (_, config) = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.servers.unwrap()[0].transport, TransportKind::Sse);
    }

    #[test]
    fn test_first_config_file_wins() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("tether.json"), r#"{"defaultTimeoutMs": 1}"#).unwrap();
        std::fs::write(temp.path().join(".tether.json"), r#"{"defaultTimeoutMs": 2}"#).unwrap();

        let (_, config) = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.default_timeout_ms, Some(1));
    }

    #[test]
    fn test_invalid_file_names_the_path() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("tether.json"), "{ not json").unwrap();

        let err = load_workspace_config(temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat(_)));
        assert!(err.to_string().contains("tether.json"));
    }

    #[test]
    fn test_save_and_init_config() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path(), None).unwrap();
        assert_eq!(path.file_name().unwrap(), "tether.json");

        let saved = load_config_file(&path).unwrap();
        assert_eq!(saved, get_example_config());

        // Never overwrites.
        assert!(init_config(temp.path(), None).is_err());
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let subdir = temp.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp.path().join("tether.json"), "{}").unwrap();

        assert_eq!(find_workspace_root(&subdir).unwrap(), temp.path());
    }

    #[test]
    fn test_find_workspace_root_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(find_workspace_root(temp.path()).is_none());
    }
}
