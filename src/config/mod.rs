// src/config/mod.rs
//! Engine configuration (`config/engine.toml`).
//!
//! ```toml
//! [engine]
//! fallback_label = "neutral"
//! epsilon = 1e-5
//! probability_decimals = 3
//!
//! [rules]
//! path = "config/scenario_rules.json"   # omit for the builtin table
//!
//! [thresholds]
//! stats_path = "config/threshold_stats.json"
//! hot_reload = false
//! overrides = { STRESS_HIGH = 65.0 }
//! ```
//!
//! Resolution: `$SCENARIO_CONFIG_PATH`, else `config/engine.toml`, else
//! defaults. Env overrides are applied last.

use crate::thresholds::is_valid_threshold_name;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";
pub const DEFAULT_FALLBACK_LABEL: &str = "neutral";
pub const DEFAULT_EPSILON: f64 = 1e-5;
pub const DEFAULT_PROBABILITY_DECIMALS: u32 = 3;
pub const MAX_PROBABILITY_DECIMALS: u32 = 12;

pub const ENV_CONFIG_PATH: &str = "SCENARIO_CONFIG_PATH";
pub const ENV_RULES_PATH: &str = "SCENARIO_RULES_PATH";
pub const ENV_STATS_PATH: &str = "SCENARIO_STATS_PATH";
pub const ENV_EPSILON: &str = "SCENARIO_EPSILON";
pub const ENV_FALLBACK_LABEL: &str = "SCENARIO_FALLBACK_LABEL";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub rules: RulesSection,
    pub thresholds: ThresholdsSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    /// Returned when no rule clears its threshold.
    pub fallback_label: String,
    /// Added to a rule's total weight before dividing.
    pub epsilon: f64,
    pub probability_decimals: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            fallback_label: DEFAULT_FALLBACK_LABEL.to_string(),
            epsilon: DEFAULT_EPSILON,
            probability_decimals: DEFAULT_PROBABILITY_DECIMALS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdsSection {
    pub stats_path: Option<PathBuf>,
    pub hot_reload: bool,
    pub overrides: BTreeMap<String, f64>,
}

impl EngineConfig {
    /// Resolve the config file, parse it, apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let path = PathBuf::from(p);
                if !path.exists() {
                    bail!("{ENV_CONFIG_PATH} points to non-existent path {}", path.display());
                }
                Self::from_file(&path)?
            }
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("engine config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Apply `SCENARIO_*` overrides read through `get`.
    pub fn apply_env_overrides<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(p) = non_empty(ENV_RULES_PATH) {
            self.rules.path = Some(PathBuf::from(p));
        }
        if let Some(p) = non_empty(ENV_STATS_PATH) {
            self.thresholds.stats_path = Some(PathBuf::from(p));
        }
        if let Some(raw) = non_empty(ENV_EPSILON) {
            self.engine.epsilon = raw
                .parse::<f64>()
                .map_err(|e| anyhow!("{ENV_EPSILON}={raw}: {e}"))?;
        }
        if let Some(label) = non_empty(ENV_FALLBACK_LABEL) {
            self.engine.fallback_label = label;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.fallback_label.trim().is_empty() {
            bail!("engine.fallback_label must not be empty");
        }
        if !(e.epsilon.is_finite() && e.epsilon > 0.0) {
            bail!("engine.epsilon must be a positive finite number, got {}", e.epsilon);
        }
        if e.probability_decimals > MAX_PROBABILITY_DECIMALS {
            bail!(
                "engine.probability_decimals must be <= {MAX_PROBABILITY_DECIMALS}, got {}",
                e.probability_decimals
            );
        }
        for (name, v) in &self.thresholds.overrides {
            if !is_valid_threshold_name(name) {
                bail!("thresholds.overrides: `{name}` is not an UPPER_SNAKE threshold name");
            }
            if !v.is_finite() {
                bail!("thresholds.overrides.{name} must be finite");
            }
        }
        if self.thresholds.hot_reload && self.thresholds.stats_path.is_none() {
            bail!("thresholds.hot_reload needs thresholds.stats_path");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_is_all_defaults() {
        let cfg = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.engine.fallback_label, "neutral");
        assert_eq!(cfg.engine.epsilon, 1e-5);
        assert_eq!(cfg.engine.probability_decimals, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_all_sections() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [engine]
            fallback_label = "no_issue"
            epsilon = 0.001

            [rules]
            path = "rules.json"

            [thresholds]
            stats_path = "stats.json"
            hot_reload = true
            overrides = { STRESS_HIGH = 65.0 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.fallback_label, "no_issue");
        assert_eq!(cfg.engine.probability_decimals, 3);
        assert_eq!(cfg.rules.path, Some(PathBuf::from("rules.json")));
        assert_eq!(cfg.thresholds.overrides["STRESS_HIGH"], 65.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            (ENV_RULES_PATH, "/tmp/r.json"),
            (ENV_EPSILON, " 0.01 "),
            (ENV_FALLBACK_LABEL, "no_issue"),
            (ENV_STATS_PATH, ""),
        ]
        .into_iter()
        .collect();
        let mut cfg = EngineConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.rules.path, Some(PathBuf::from("/tmp/r.json")));
        assert_eq!(cfg.engine.epsilon, 0.01);
        assert_eq!(cfg.engine.fallback_label, "no_issue");
        assert_eq!(cfg.thresholds.stats_path, None);
    }

    #[test]
    fn bad_epsilon_env_is_an_error() {
        let mut cfg = EngineConfig::default();
        let err = cfg
            .apply_env_overrides(|k| (k == ENV_EPSILON).then(|| "tiny".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_EPSILON));
    }

    #[test]
    fn validation_rejects_nonsense() {
        let mut cfg = EngineConfig::default();
        cfg.engine.epsilon = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.thresholds.overrides.insert("lower".into(), 1.0);
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.thresholds.hot_reload = true;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.engine.fallback_label = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wrong_value_type_is_an_error() {
        assert!(EngineConfig::from_toml_str("[engine]\nepsilon = \"x\"").is_err());
    }
}
