use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

// ── Final (merged) config types ──

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ShellConfig {
    pub prompt: String,
    /// Declared width of the shell streams, in characters.
    #[serde(default)]
    pub width: Option<usize>,
    pub variables: VariablesConfig,
    pub hexcode: HexCodeConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VariablesConfig {
    /// Character that starts a variable reference.
    pub prefix: char,
    pub case_sensitive: bool,
    pub preprocess: i32,
    /// Variables seeded after the process environment.
    #[serde(default)]
    pub locals: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HexCodeConfig {
    pub enabled: bool,
    pub preprocess: i32,
}

// ── Overlay types (user config that merges with defaults) ──

#[derive(Debug, Deserialize, Default)]
struct ConfigOverlay {
    prompt: Option<String>,
    width: Option<usize>,
    #[serde(default)]
    variables: VariablesOverlay,
    #[serde(default)]
    hexcode: HexCodeOverlay,
}

#[derive(Debug, Deserialize, Default)]
struct VariablesOverlay {
    prefix: Option<char>,
    case_sensitive: Option<bool>,
    preprocess: Option<i32>,
    #[serde(default)]
    locals: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
struct HexCodeOverlay {
    enabled: Option<bool>,
    preprocess: Option<i32>,
}

impl ShellConfig {
    /// Load the default embedded configuration.
    pub fn default_config() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG).context("embedded default config must parse")
    }

    /// Defaults, merged with the user file at `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config()?;
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("can't read config {}", path.display()))?;
            config.merge_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
        }
        Ok(config)
    }

    /// Merge a TOML overlay: scalars override, locals extend.
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let overlay: ConfigOverlay = toml::from_str(content)?;
        self.apply_overlay(overlay);
        Ok(())
    }

    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(v) = overlay.prompt {
            self.prompt = v;
        }
        if overlay.width.is_some() {
            self.width = overlay.width;
        }

        let v = overlay.variables;
        if let Some(prefix) = v.prefix {
            self.variables.prefix = prefix;
        }
        if let Some(case_sensitive) = v.case_sensitive {
            self.variables.case_sensitive = case_sensitive;
        }
        if let Some(preprocess) = v.preprocess {
            self.variables.preprocess = preprocess;
        }
        self.variables.locals.extend(v.locals);

        let h = overlay.hexcode;
        if let Some(enabled) = h.enabled {
            self.hexcode.enabled = enabled;
        }
        if let Some(preprocess) = h.preprocess {
            self.hexcode.preprocess = preprocess;
        }
    }
}
