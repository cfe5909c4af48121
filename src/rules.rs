//! # Rule Table
//!
//! Declarative scenario rules loaded from JSON (`config/scenario_rules.json`
//! is embedded as the builtin table).
//!
//! ```json
//! { "fields": { "주거비": "housing_cost" },
//!   "rules": [ { "name": "low_cash", "priority": 8, "label": "low_cash", "threshold": 3,
//!                "gate": ["Liquidity_Score <= {LIQ_P20}"],
//!                "signals": [ { "expr": "Necessity_Ratio >= {NEC_P80}", "weight": 2 } ],
//!                "modifiers": [ { "expr": "Life_Stage in ['1인가구']", "delta": 1 } ] } ] }
//! ```
//!
//! Every expression is parsed and field-translated once, here. A table that
//! references an unknown field or threshold, or carries a malformed weight,
//! is rejected at load; scoring never sees it.
//!
//! `priority` is carried for documentation only. Selection is by probability.

use crate::expr::CompiledExpr;
use crate::fields::FieldTranslator;
use crate::thresholds::ThresholdTable;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub const BUILTIN_RULES_JSON: &str = include_str!("../config/scenario_rules.json");

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleSetDef {
    /// Extra domain → canonical field names, on top of the builtin table.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleDef {
    pub name: String,
    #[serde(default)]
    pub priority: Option<i64>,
    pub label: String,
    pub threshold: f64,
    #[serde(default)]
    pub gate: Vec<GateDef>,
    #[serde(default)]
    pub signals: Vec<SignalDef>,
    #[serde(default)]
    pub modifiers: Vec<ModifierDef>,
}

/// Gates may be written bare (`"a > 0"`) or as `{ "expr": "a > 0" }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GateDef {
    Bare(String),
    Expr { expr: String },
}

impl GateDef {
    pub fn expr(&self) -> &str {
        match self {
            GateDef::Bare(s) | GateDef::Expr { expr: s } => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalDef {
    pub expr: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModifierDef {
    pub expr: String,
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub expr: CompiledExpr,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub expr: CompiledExpr,
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub priority: Option<i64>,
    pub label: String,
    pub threshold: f64,
    pub gate: Vec<CompiledExpr>,
    pub signals: Vec<Signal>,
    pub modifiers: Vec<Modifier>,
    total_weight: f64,
}

impl Rule {
    /// Sum of all signal weights, true or not.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn expressions(&self) -> impl Iterator<Item = &CompiledExpr> {
        self.gate
            .iter()
            .chain(self.signals.iter().map(|s| &s.expr))
            .chain(self.modifiers.iter().map(|m| &m.expr))
    }
}

/// Ordered, validated rules plus the translator they were compiled with.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
    translator: Arc<FieldTranslator>,
    referenced_fields: Vec<String>,
}

impl RuleTable {
    /// The embedded 14-scenario table, validated against default thresholds.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_RULES_JSON, &ThresholdTable::default())
            .context("builtin rule table")
    }

    pub fn from_json(raw: &str, thresholds: &ThresholdTable) -> Result<Self> {
        let def: RuleSetDef =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid rule JSON: {e}"))?;
        Self::from_def(def, thresholds)
    }

    pub fn load_rules_file(path: &Path, thresholds: &ThresholdTable) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read rules at {}: {}", path.display(), e))?;
        Self::from_json(&raw, thresholds).with_context(|| format!("rules at {}", path.display()))
    }

    /// Compile and validate `def`. `thresholds` is the snapshot every
    /// placeholder must resolve in.
    pub fn from_def(def: RuleSetDef, thresholds: &ThresholdTable) -> Result<Self> {
        for (domain, canonical) in &def.fields {
            if domain.trim().is_empty() || canonical.trim().is_empty() {
                bail!("field mapping `{domain}` → `{canonical}` has an empty side");
            }
        }
        let translator = Arc::new(FieldTranslator::builtin().clone().with_fields(def.fields));

        if def.rules.is_empty() {
            warn!(target: "scenario::engine", "rule table is empty; every row will score as the fallback label");
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(def.rules.len());
        for rd in def.rules {
            if rd.name.trim().is_empty() {
                bail!("rule #{} has an empty name", rules.len() + 1);
            }
            if !seen.insert(rd.name.clone()) {
                bail!("duplicate rule name `{}`", rd.name);
            }
            let rule = compile_rule(rd, &translator, thresholds)?;
            rules.push(rule);
        }

        let mut referenced_fields: Vec<String> = Vec::new();
        for e in rules.iter().flat_map(Rule::expressions) {
            for f in e.fields() {
                if !referenced_fields.contains(f) {
                    referenced_fields.push(f.clone());
                }
            }
        }

        Ok(Self {
            rules,
            translator,
            referenced_fields,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn translator(&self) -> &FieldTranslator {
        &self.translator
    }

    /// Canonical keys read by any rule, in first-seen order.
    pub fn referenced_fields(&self) -> &[String] {
        &self.referenced_fields
    }

    /// Threshold names read by any rule.
    pub fn referenced_thresholds(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for e in self.rules.iter().flat_map(Rule::expressions) {
            for t in e.thresholds() {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        }
        out
    }
}

fn compile_expr(
    src: &str,
    translator: &FieldTranslator,
    thresholds: &ThresholdTable,
) -> Result<CompiledExpr> {
    let c = CompiledExpr::compile(src, translator).map_err(|e| anyhow!("`{src}`: {e}"))?;
    c.check_thresholds(thresholds)
        .map_err(|e| anyhow!("`{src}`: {e}"))?;
    Ok(c)
}

fn compile_rule(rd: RuleDef, translator: &FieldTranslator, thresholds: &ThresholdTable) -> Result<Rule> {
    let name = rd.name;
    if rd.label.trim().is_empty() {
        bail!("rule `{name}`: empty label");
    }
    if !rd.threshold.is_finite() {
        bail!("rule `{name}`: threshold must be finite");
    }

    let mut gate = Vec::with_capacity(rd.gate.len());
    for (i, g) in rd.gate.iter().enumerate() {
        let c = compile_expr(g.expr(), translator, thresholds)
            .with_context(|| format!("rule `{name}` gate #{}", i + 1))?;
        gate.push(c);
    }

    let mut signals = Vec::with_capacity(rd.signals.len());
    for (i, s) in rd.signals.iter().enumerate() {
        if !s.weight.is_finite() || s.weight < 0.0 {
            bail!("rule `{name}` signal #{}: weight {} must be finite and >= 0", i + 1, s.weight);
        }
        let expr = compile_expr(&s.expr, translator, thresholds)
            .with_context(|| format!("rule `{name}` signal #{}", i + 1))?;
        signals.push(Signal {
            expr,
            weight: s.weight,
        });
    }

    let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
    if signals.is_empty() {
        warn!(target: "scenario::engine", rule = %name, "rule has no signals; only modifiers can move its score");
    } else if total_weight <= 0.0 {
        bail!("rule `{name}`: signal weights must sum to more than 0");
    }

    let mut modifiers = Vec::with_capacity(rd.modifiers.len());
    for (i, m) in rd.modifiers.iter().enumerate() {
        if !m.delta.is_finite() {
            bail!("rule `{name}` modifier #{}: delta must be finite", i + 1);
        }
        let expr = compile_expr(&m.expr, translator, thresholds)
            .with_context(|| format!("rule `{name}` modifier #{}", i + 1))?;
        modifiers.push(Modifier {
            expr,
            delta: m.delta,
        });
    }

    Ok(Rule {
        name,
        priority: rd.priority,
        label: rd.label,
        threshold: rd.threshold,
        gate,
        signals,
        modifiers,
        total_weight,
    })
}
