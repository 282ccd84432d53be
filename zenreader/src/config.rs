use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use zenreader_core::classify::LocalHeuristicClassifier;
use zenreader_core::library::INTERNAL_DIR_NAME;
use zenreader_core::organize::OrganizeOptions;
use zenreader_extensions::gemini::DEFAULT_MODEL;

pub const CONFIG_FILENAME: &str = "config.json";

/// Per-library settings, stored in `<library>/.zenreader/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub organize: OrganizeOptions,
    pub gemini: GeminiSettings,
    /// Replaces the built-in heuristic table when non-empty.
    pub rules: Vec<RuleConfig>,
    pub subjects: SubjectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        GeminiSettings {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }
}

impl GeminiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub category: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectSettings {
    pub enabled: bool,
}

impl Default for SubjectSettings {
    fn default() -> Self {
        SubjectSettings { enabled: true }
    }
}

pub fn config_path(library_root: &Path) -> PathBuf {
    library_root.join(INTERNAL_DIR_NAME).join(CONFIG_FILENAME)
}

impl Config {
    /// Loads the library's configuration. A missing file means defaults.
    pub async fn load(library_root: &Path) -> Result<Self> {
        let path = config_path(library_root);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Invalid configuration file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn save(&self, library_root: &Path) -> Result<()> {
        let path = config_path(library_root);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let text = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// The heuristic classifier described by `rules`, or the built-in table when there are none.
    pub fn heuristics(&self) -> Result<LocalHeuristicClassifier> {
        if self.rules.is_empty() {
            return Ok(LocalHeuristicClassifier::default());
        }
        LocalHeuristicClassifier::from_patterns(self.rules.iter().map(|r| (r.category.clone(), r.pattern.as_str())))
            .context("Invalid heuristic rule pattern in configuration")
    }

    /// Looks up a dotted key such as `organize.cooldown_secs`.
    pub fn get(&self, key: &str) -> Result<Value> {
        let root = serde_json::to_value(self)?;
        key.split('.')
            .try_fold(&root, |node, segment| node.get(segment))
            .cloned()
            .ok_or_else(|| anyhow!("Unknown configuration key '{}'", key))
    }

    /// Sets a dotted key. `raw` is parsed as JSON when possible, otherwise taken as a string.
    /// The result must still be a valid configuration.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut root = serde_json::to_value(&*self)?;
        let mut node = &mut root;
        let segments: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            bail!("Empty configuration key");
        };
        for segment in parents {
            node = node
                .get_mut(*segment)
                .ok_or_else(|| anyhow!("Unknown configuration key '{}'", key))?;
        }
        let Some(slot) = node.as_object_mut().and_then(|map| map.get_mut(*last)) else {
            bail!("Unknown configuration key '{}'", key);
        };
        *slot = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        *self = serde_json::from_value(root)
            .with_context(|| format!("Invalid value '{}' for configuration key '{}'", raw, key))?;
        Ok(())
    }

    /// All leaf keys with their values, in dotted form.
    pub fn entries(&self) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        flatten(String::new(), &serde_json::to_value(self)?, &mut out);
        Ok(out)
    }
}

fn flatten(prefix: String, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                flatten(key, v, out);
            }
        }
        _ => out.push((prefix, value.clone())),
    }
}
