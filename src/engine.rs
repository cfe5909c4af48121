//! # Scoring Engine
//! Maps `(row, message)` → `ScenarioResult` by walking the rule table in
//! order against one threshold snapshot.
//!
//! Per rule: any false gate skips it; true signal weights and true modifier
//! deltas sum to `raw`; `p = sigmoid(raw / (total_weight + epsilon))`. A rule
//! competes only when `raw >= threshold`, and replaces the current best only
//! with a strictly higher `p`, so equal probabilities keep the earlier rule.
//! `priority` takes no part.
//!
//! Scoring never fails: expression errors count as `false`, and a row where
//! nothing clears its threshold yields the fallback label with `p = 0`.

use crate::config::{EngineConfig, MAX_PROBABILITY_DECIMALS};
use crate::debug::{anon_hash, dev_logging_enabled, truncate_vec};
use crate::metrics::{SCORING_DURATION_US, SCORING_TOTAL};
use crate::rules::{Rule, RuleTable};
use crate::scenario::{RuleOutcome, ScenarioReport, ScenarioResult};
use crate::thresholds::{ThresholdStats, ThresholdStore, ThresholdTable};
use crate::value::FeatureRow;
use anyhow::{Context, Result};
use metrics::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Round half away from zero. `decimals` is capped at
/// [`MAX_PROBABILITY_DECIMALS`] so the scale stays finite.
pub fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals.min(MAX_PROBABILITY_DECIMALS) as i32);
    (x * scale).round() / scale
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub fallback_label: String,
    pub epsilon: f64,
    pub probability_decimals: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let d = crate::config::EngineSection::default();
        Self {
            fallback_label: d.fallback_label,
            epsilon: d.epsilon,
            probability_decimals: d.probability_decimals,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioEngine {
    rules: Arc<RuleTable>,
    store: ThresholdStore,
    settings: EngineSettings,
}

struct Best<'r> {
    rule: &'r Rule,
    probability: f64,
    key_metrics: BTreeMap<String, String>,
}

impl ScenarioEngine {
    pub fn new(rules: RuleTable, store: ThresholdStore) -> Self {
        Self {
            rules: Arc::new(rules),
            store,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builtin rules over default thresholds.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(RuleTable::builtin()?, ThresholdStore::default()))
    }

    /// Build from configuration: thresholds (defaults, overrides, then the
    /// optional stats file), then rules validated against that snapshot.
    /// Starting the stats watcher is left to the caller.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let table = ThresholdTable::with_overrides(
            cfg.thresholds
                .overrides
                .iter()
                .map(|(k, v)| (k.clone(), *v)),
        );
        let store = ThresholdStore::new(table);

        if let Some(path) = &cfg.thresholds.stats_path {
            let stats = ThresholdStats::load_from_file(path)?;
            let report = store.refresh(&stats);
            info!(
                target: "scenario::thresholds",
                path = %path.display(),
                updated = report.updated.len(),
                skipped = report.skipped.len(),
                "startup stats applied"
            );
        }

        let snapshot = store.snapshot();
        let rules = match &cfg.rules.path {
            Some(p) => RuleTable::load_rules_file(p, &snapshot)?,
            None => RuleTable::from_json(crate::rules::BUILTIN_RULES_JSON, &snapshot)
                .context("builtin rule table")?,
        };
        info!(
            target: "scenario::engine",
            rules = rules.len(),
            fields = rules.referenced_fields().len(),
            generation = snapshot.generation(),
            "scenario engine ready"
        );

        Ok(Self::new(rules, store).with_settings(EngineSettings {
            fallback_label: cfg.engine.fallback_label.clone(),
            epsilon: cfg.engine.epsilon,
            probability_decimals: cfg.engine.probability_decimals,
        }))
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn store(&self) -> &ThresholdStore {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Score against the current threshold snapshot. `message` is not read by
    /// any rule; it only feeds the anonymized dev log.
    pub fn score_scenarios(&self, row: &FeatureRow, message: &str) -> ScenarioResult {
        let snapshot = self.store.snapshot();
        self.score_with_snapshot(row, message, &snapshot)
    }

    /// Score against an explicit snapshot.
    pub fn score_with_snapshot(
        &self,
        row: &FeatureRow,
        message: &str,
        thresholds: &ThresholdTable,
    ) -> ScenarioResult {
        self.run(row, message, thresholds, None).result
    }

    /// Score and return the per-rule trace alongside the result.
    pub fn explain(&self, row: &FeatureRow, message: &str) -> ScenarioReport {
        let snapshot = self.store.snapshot();
        let mut outcomes = Vec::with_capacity(self.rules.len());
        let mut report = self.run(row, message, &snapshot, Some(&mut outcomes));
        report.rules = outcomes;
        report
    }

    fn run(
        &self,
        row: &FeatureRow,
        message: &str,
        thresholds: &ThresholdTable,
        mut trace: Option<&mut Vec<RuleOutcome>>,
    ) -> ScenarioReport {
        let started = Instant::now();
        let env = self.rules.translator().translate_and_fill(
            row.clone(),
            self.rules.referenced_fields().iter().map(String::as_str),
        );

        let mut best: Option<Best<'_>> = None;
        for rule in self.rules.rules() {
            let total_weight = rule.total_weight();

            if !rule.gate.iter().all(|g| g.eval(&env, thresholds)) {
                if let Some(t) = trace.as_deref_mut() {
                    t.push(RuleOutcome::gated(&rule.name, &rule.label, rule.priority, total_weight));
                }
                continue;
            }

            let mut raw = 0.0;
            let mut true_signals = Vec::new();
            for s in &rule.signals {
                if s.expr.eval(&env, thresholds) {
                    raw += s.weight;
                    true_signals.push(&s.expr);
                }
            }
            let mut applied = Vec::new();
            for m in &rule.modifiers {
                if m.expr.eval(&env, thresholds) {
                    raw += m.delta;
                    applied.push(m.expr.source().to_string());
                }
            }

            let probability = sigmoid(raw / (total_weight + self.settings.epsilon));
            let eligible = raw >= rule.threshold;

            if eligible && probability > best.as_ref().map_or(0.0, |b| b.probability) {
                let key_metrics = true_signals
                    .iter()
                    .map(|e| {
                        let values: Vec<String> = e
                            .fields()
                            .iter()
                            .map(|f| match env.get(f) {
                                Some(v) => format!("{f}={v}"),
                                None => format!("{f}=null"),
                            })
                            .collect();
                        (e.source().to_string(), values.join(", "))
                    })
                    .collect();
                best = Some(Best {
                    rule,
                    probability,
                    key_metrics,
                });
            }

            if let Some(t) = trace.as_deref_mut() {
                t.push(RuleOutcome {
                    name: rule.name.clone(),
                    label: rule.label.clone(),
                    priority: rule.priority,
                    gate_passed: true,
                    raw_score: raw,
                    total_weight,
                    probability,
                    eligible,
                    true_signals: true_signals.iter().map(|e| e.source().to_string()).collect(),
                    applied_modifiers: applied,
                });
            }
        }

        let (result, winner) = match best {
            Some(b) => (
                ScenarioResult {
                    label: b.rule.label.clone(),
                    probability: round_to(b.probability, self.settings.probability_decimals),
                    key_metrics: b.key_metrics,
                },
                Some(b.rule.name.clone()),
            ),
            None => (
                ScenarioResult::fallback(self.settings.fallback_label.clone()),
                None,
            ),
        };

        counter!(SCORING_TOTAL, "label" => result.label.clone()).increment(1);
        histogram!(SCORING_DURATION_US).record(started.elapsed().as_micros() as f64);
        dev_log_scoring(message, &result, winner.as_deref(), thresholds.generation());

        ScenarioReport {
            result,
            winner,
            threshold_generation: thresholds.generation(),
            rules: Vec::new(),
        }
    }
}

/// Anonymized per-call log; the message itself is never written.
fn dev_log_scoring(message: &str, result: &ScenarioResult, winner: Option<&str>, generation: u64) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(message);
    let metrics: Vec<&String> = result.key_metrics.keys().collect();
    info!(
        target: "scenario::engine",
        %id,
        msg_len = message.chars().count(),
        label = %result.label,
        probability = result.probability,
        winner = winner.unwrap_or("-"),
        generation,
        signals = ?truncate_vec(&metrics, 5),
        "scored"
    );
}
