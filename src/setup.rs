//! First-run setup: materialize `configs/` from `configs.template/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::config::EXCHANGE_FILE;

pub const TEMPLATE_DIR: &str = "configs.template";
pub const CONFIG_DIR: &str = "configs";
const TEMPLATE_SUFFIX: &str = ".template";

/// Credentials written into `exchange_config.json` by `setup`.
#[derive(Debug, Clone, Default)]
pub struct SetupCredentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub demo_trade: bool,
}

impl SetupCredentials {
    fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.api_secret.is_none() && !self.demo_trade
    }
}

/// Rename the template directory (and its `*.template` files) under `root`
/// into the live config directory, then apply `credentials`.
///
/// Returns the config directory.
pub fn run_setup(root: &Path, credentials: &SetupCredentials) -> Result<PathBuf> {
    let template_dir = root.join(TEMPLATE_DIR);
    let config_dir = root.join(CONFIG_DIR);

    if template_dir.is_dir() {
        if config_dir.exists() {
            bail!("{} already exists, refusing to overwrite it", config_dir.display());
        }
        promote_templates(&template_dir, &config_dir)?;
        info!(dir = %config_dir.display(), "Config templates installed");
    } else if !config_dir.is_dir() {
        bail!("`{}` does not exist", template_dir.display());
    }

    if !credentials.is_empty() {
        write_credentials(&config_dir.join(EXCHANGE_FILE), credentials)?;
        info!(demo_trade = credentials.demo_trade, "Exchange credentials written");
    }

    Ok(config_dir)
}

fn promote_templates(template_dir: &Path, config_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(template_dir)
        .with_context(|| format!("Failed to list {}", template_dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stripped) = name.strip_suffix(TEMPLATE_SUFFIX) {
            fs::rename(&path, template_dir.join(stripped))
                .with_context(|| format!("Failed to rename {}", path.display()))?;
        }
    }

    fs::rename(template_dir, config_dir).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            template_dir.display(),
            config_dir.display()
        )
    })
}

fn write_credentials(path: &Path, credentials: &SetupCredentials) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut config: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let Some(root) = config.as_object_mut() else {
        bail!("{} must contain a JSON object", path.display());
    };

    let bybit = root
        .entry("api")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .and_then(|api| api.entry("bybit").or_insert_with(|| json!({})).as_object_mut())
        .with_context(|| format!("`api.bybit` in {} must be an object", path.display()))?;

    if let Some(key) = &credentials.api_key {
        bybit.insert("apiKey".to_string(), json!(key));
    }
    if let Some(secret) = &credentials.api_secret {
        bybit.insert("secret".to_string(), json!(secret));
    }
    if credentials.demo_trade {
        root.insert("demo_trade".to_string(), json!(true));
    }

    fs::write(path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("trailbot-setup-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join(TEMPLATE_DIR)).unwrap();
        fs::write(
            dir.join(TEMPLATE_DIR).join("exchange_config.json.template"),
            r#"{"api": {"bybit": {"apiKey": "", "secret": ""}}, "demo_trade": false}"#,
        )
        .unwrap();
        fs::write(dir.join(TEMPLATE_DIR).join("strategy_config.json.template"), "{}").unwrap();
        dir
    }

    #[test]
    fn test_setup_renames_templates() {
        let root = temp_root("rename");
        let config_dir = run_setup(&root, &SetupCredentials::default()).unwrap();

        assert!(!root.join(TEMPLATE_DIR).exists());
        assert!(config_dir.join("exchange_config.json").is_file());
        assert!(config_dir.join("strategy_config.json").is_file());

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_setup_writes_credentials() {
        let root = temp_root("creds");
        let credentials = SetupCredentials {
            api_key: Some("my-key".to_string()),
            api_secret: Some("my-secret".to_string()),
            demo_trade: true,
        };
        let config_dir = run_setup(&root, &credentials).unwrap();

        let written: Value =
            serde_json::from_str(&fs::read_to_string(config_dir.join(EXCHANGE_FILE)).unwrap()).unwrap();
        assert_eq!(written["api"]["bybit"]["apiKey"], "my-key");
        assert_eq!(written["api"]["bybit"]["secret"], "my-secret");
        assert_eq!(written["demo_trade"], true);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_setup_without_templates_fails() {
        let root = std::env::temp_dir().join(format!("trailbot-setup-empty-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();

        assert!(run_setup(&root, &SetupCredentials::default()).is_err());

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_setup_refuses_to_overwrite_configs() {
        let root = temp_root("exists");
        fs::create_dir_all(root.join(CONFIG_DIR)).unwrap();

        assert!(run_setup(&root, &SetupCredentials::default()).is_err());
        assert!(root.join(TEMPLATE_DIR).exists());

        fs::remove_dir_all(&root).ok();
    }
}
