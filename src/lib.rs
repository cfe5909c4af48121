// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod debug;
pub mod derive;
pub mod engine;
pub mod expr;
pub mod fields;
pub mod metrics;
pub mod rules;
pub mod scenario;
pub mod thresholds;
pub mod value;

// ---- Re-exports for stable public API ----
pub use crate::config::EngineConfig;
pub use crate::engine::{sigmoid, EngineSettings, ScenarioEngine};
pub use crate::expr::{eval_expr, CompiledExpr, EvalError};
pub use crate::fields::FieldTranslator;
pub use crate::rules::RuleTable;
pub use crate::scenario::{RuleOutcome, ScenarioReport, ScenarioResult};
pub use crate::thresholds::{RefreshReport, ThresholdStats, ThresholdStore, ThresholdTable};
pub use crate::value::{FeatureRow, Value};
