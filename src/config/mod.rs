// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for tether.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.tether/config.json
//! - Workspace config: tether.json, .tether.json, .tether/config.json, or tether.yaml
//! - Local config: .tether.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{ResolvedConfig, SecurityConfigPartial, WorkspaceConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading. The result is
/// validated, so a config that loads can be handed straight to the manager.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;
    resolve([global, workspace, local], cli_options)
}

/// Like [`load_config`], but with an explicit file in place of the
/// workspace search. Global and local layers still apply.
pub fn load_config_with_file(
    workspace_root: &Path,
    file: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    if !file.is_file() {
        return Err(ConfigError::NotFound(file.display().to_string()));
    }
    let global = load_global_config()?;
    let explicit = Some((file.to_path_buf(), load_config_file(file)?));
    let local = load_local_config(workspace_root)?;
    resolve([global, explicit, local], cli_options)
}

fn resolve(
    layers: [Option<(PathBuf, WorkspaceConfig)>; 3],
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let mut sources = Vec::new();
    let [global, workspace, local] = layers.map(|layer| {
        layer.map(|(path, config)| {
            sources.push(path);
            config
        })
    });

    let mut resolved = merge_config(global, workspace, local, cli_options);
    resolved.sources = sources;
    resolved.manager_config().validate()?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let result = load_config(temp.path(), CliOptions::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_config_with_workspace_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("tether.json"),
            r#"{"servers": [{"name": "fs", "transport": "npx", "command": "pkg", "timeoutMs": 500}]}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        let fs = config.servers.iter().find(|s| s.name == "fs").unwrap();
        assert_eq!(fs.timeout_ms, 500);
        assert!(config.sources.iter().any(|p| p.ends_with("tether.json")));
    }

    #[test]
    fn test_local_overrides_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("tether.json"),
            r#"{"servers": [{"name": "fs", "transport": "npx", "command": "pkg"}]}"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join(LOCAL_CONFIG_FILE),
            r#"{"servers": [{"name": "fs", "transport": "npx", "command": "pkg@2.0.0"}]}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        let fs = config.servers.iter().find(|s| s.name == "fs").unwrap();
        assert_eq!(fs.command.as_deref(), Some("pkg@2.0.0"));
    }

    #[test]
    fn test_load_config_cli_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("tether.json"), r#"{"namespaceTools": true}"#).unwrap();

        let cli = CliOptions {
            namespace_tools: Some(false),
            ..Default::default()
        };
        let config = load_config(temp.path(), cli).unwrap();
        assert!(!config.namespace.enabled); // CLI wins
    }

    #[test]
    fn test_invalid_server_is_rejected_at_load() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("tether.json"),
            r#"{"servers": [{"name": "api", "transport": "https", "url": "http://insecure.example.com"}]}"#,
        )
        .unwrap();

        let err = load_config(temp.path(), CliOptions::default()).unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_explicit_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("custom.yaml");
        std::fs::write(&file, "defaultTimeoutMs: 1234\n").unwrap();

        let config = load_config_with_file(temp.path(), &file, CliOptions::default()).unwrap();
        assert_eq!(config.default_timeout_ms, 1234);

        let missing = temp.path().join("missing.json");
        assert!(matches!(
            load_config_with_file(temp.path(), &missing, CliOptions::default()),
            Err(ConfigError::NotFound(_))
        ));
    }
}
