//! Scoring output shapes.
//!
//! `ScenarioResult` is what the chat-reply assembler consumes; `ScenarioReport`
//! adds the per-rule trace returned by `ScenarioEngine::explain`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Winning scenario for one `(row, message)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub label: String,
    /// Logistic score in `[0, 1]`, rounded (3 decimals by default).
    pub probability: f64,
    /// Signal expression text → `canonical=value` pairs for each field that
    /// signal read. Only the winning rule's true signals appear.
    #[serde(default)]
    pub key_metrics: BTreeMap<String, String>,
}

impl ScenarioResult {
    /// Nothing cleared its threshold.
    pub fn fallback(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            probability: 0.0,
            key_metrics: BTreeMap::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.probability == 0.0 && self.key_metrics.is_empty()
    }
}

/// How a single rule fared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub gate_passed: bool,
    /// Sum of true signal weights plus applied modifier deltas.
    pub raw_score: f64,
    pub total_weight: f64,
    /// Unrounded.
    pub probability: f64,
    /// `raw_score >= threshold` (and gate passed).
    pub eligible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub true_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_modifiers: Vec<String>,
}

impl RuleOutcome {
    pub fn gated(name: &str, label: &str, priority: Option<i64>, total_weight: f64) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            priority,
            gate_passed: false,
            raw_score: 0.0,
            total_weight,
            probability: 0.0,
            eligible: false,
            true_signals: Vec::new(),
            applied_modifiers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub result: ScenarioResult,
    /// Name of the winning rule, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Threshold table generation used for this call.
    pub threshold_generation: u64,
    pub rules: Vec<RuleOutcome>,
}
