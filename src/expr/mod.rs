//! # Expression Evaluator
//!
//! Sandboxed evaluation of the rule expression language against one feature
//! row and one threshold snapshot. Source text is tokenized and parsed into an
//! AST; nothing is ever handed to a general-purpose interpreter. The only
//! callable surface is the `math.*` allow-list in [`ast::MathFn`].
//!
//! Errors are typed internally ([`EvalError`]) and collapse to `false` at the
//! public boundary ([`CompiledExpr::eval`], [`eval_expr`]).

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use crate::fields::FieldTranslator;
use crate::metrics::EXPR_ERRORS_TOTAL;
use crate::thresholds::ThresholdTable;
use crate::value::{FeatureRow, Value};
use metrics::counter;
use thiserror::Error;
use tracing::debug;

pub use ast::Expr;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("lex error at {pos}: {message}")]
    Lex { pos: usize, message: String },
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("unknown threshold `{{{0}}}`")]
    UnknownThreshold(String),
    #[error("unsupported operand types for {op}: {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("math domain error: {0}")]
    MathDomain(String),
    #[error("`{0}` is not an allowed function or constant")]
    UnknownFunction(String),
    #[error("math.{func} takes a different number of arguments (got {got})")]
    Arity { func: &'static str, got: usize },
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression longer than {0} characters")]
    TooLong(usize),
}

/// A parsed expression with field names already translated to canonical keys.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    fields: Vec<String>,
    thresholds: Vec<String>,
}

impl CompiledExpr {
    /// Parse `src` and rename every identifier through `translator`.
    /// An identifier the translator doesn't know is an error.
    pub fn compile(src: &str, translator: &FieldTranslator) -> Result<Self, EvalError> {
        Self::compile_with(src, |name| {
            translator
                .canonical_name(name)
                .map(str::to_string)
                .ok_or_else(|| EvalError::UnknownField(name.to_string()))
        })
    }

    /// Like [`compile`](Self::compile), but identifiers the translator
    /// doesn't know are kept verbatim and looked up in the row as-is.
    pub fn compile_lenient(src: &str, translator: &FieldTranslator) -> Result<Self, EvalError> {
        Self::compile_with(src, |name| {
            Ok(translator.canonical_name(name).unwrap_or(name).to_string())
        })
    }

    fn compile_with(
        src: &str,
        mut rename: impl FnMut(&str) -> Result<String, EvalError>,
    ) -> Result<Self, EvalError> {
        let mut ast = parser::parse(src)?;
        ast.rename_fields(&mut rename)?;
        let fields = ast.fields();
        let thresholds = ast.thresholds();
        Ok(Self {
            source: src.to_string(),
            ast,
            fields,
            thresholds,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Canonical row keys this expression reads.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Threshold names this expression reads.
    pub fn thresholds(&self) -> &[String] {
        &self.thresholds
    }

    /// Every placeholder must resolve in `table`.
    pub fn check_thresholds(&self, table: &ThresholdTable) -> Result<(), EvalError> {
        match self.thresholds.iter().find(|t| !table.contains(t)) {
            Some(missing) => Err(EvalError::UnknownThreshold(missing.clone())),
            None => Ok(()),
        }
    }

    /// Raw value of the expression. `row` must already carry defaults for
    /// [`fields`](Self::fields).
    pub fn try_eval(&self, row: &FeatureRow, thresholds: &ThresholdTable) -> Result<Value, EvalError> {
        eval::evaluate(&self.ast, row, thresholds)
    }

    /// Truthiness of the expression; any evaluation error is `false`.
    pub fn eval(&self, row: &FeatureRow, thresholds: &ThresholdTable) -> bool {
        match self.try_eval(row, thresholds) {
            Ok(v) => v.is_truthy(),
            Err(e) => {
                degraded(&self.source, &e);
                false
            }
        }
    }
}

fn degraded(source: &str, err: &EvalError) {
    counter!(EXPR_ERRORS_TOTAL).increment(1);
    debug!(target: "scenario::expr", expr = %source, error = %err, "expression degraded to false");
}

/// One-shot evaluation with the builtin field table. Translation and default
/// filling happen on a private copy; `row` and `thresholds` are untouched.
///
/// Names outside the table resolve straight from the row. Only known fields
/// get defaults, so an unknown name the row lacks evaluates to `false`.
pub fn eval_expr(expr: &str, row: &FeatureRow, thresholds: &ThresholdTable) -> bool {
    let translator = FieldTranslator::builtin();
    let compiled = match CompiledExpr::compile_lenient(expr, translator) {
        Ok(c) => c,
        Err(e) => {
            degraded(expr, &e);
            return false;
        }
    };
    let env = translator.translate_and_fill(
        row.clone(),
        compiled
            .fields()
            .iter()
            .map(String::as_str)
            .filter(|f| translator.is_known(f)),
    );
    compiled.eval(&env, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> FeatureRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn compile_translates_domain_names() {
        let c = CompiledExpr::compile(
            "(연체일수_B1M > 0) & (Liquidity_Score < {LIQ_P20})",
            FieldTranslator::builtin(),
        )
        .unwrap();
        assert_eq!(c.fields(), ["delinquent_days_b1m", "liquidity_score"]);
        assert_eq!(c.thresholds(), ["LIQ_P20"]);
    }

    #[test]
    fn unknown_identifier_fails_compile() {
        let err = CompiledExpr::compile("mystery > 1", FieldTranslator::builtin()).unwrap_err();
        assert_eq!(err, EvalError::UnknownField("mystery".into()));
    }

    #[test]
    fn lenient_compile_keeps_unknown_names() {
        let c = CompiledExpr::compile_lenient(
            "mystery > 1 and Debt_Ratio > 0",
            FieldTranslator::builtin(),
        )
        .unwrap();
        assert_eq!(c.fields(), ["mystery", "debt_ratio"]);
    }

    #[test]
    fn eval_expr_reads_row_only_keys() {
        let t = ThresholdTable::default();
        let r = row(&[("stress", Value::Int(80)), ("스트레스지수", Value::Float(0.5))]);
        assert!(eval_expr("stress > 70", &r, &t));
        assert!(eval_expr("스트레스지수 == 0.5", &r, &t));
        assert!(!eval_expr("stress < 70", &r, &t));
        // absent and unknown: no default, so the lookup fails → false
        assert!(!eval_expr("absent_metric == 0", &r, &t));
        assert!(!eval_expr("not absent_metric", &r, &t));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn threshold_check_against_table() {
        let c = CompiledExpr::compile("debt_ratio > {DEBT_P99}", FieldTranslator::builtin()).unwrap();
        assert!(matches!(
            c.check_thresholds(&ThresholdTable::default()),
            Err(EvalError::UnknownThreshold(_))
        ));
        let t = ThresholdTable::with_overrides([("DEBT_P99".to_string(), 99.0)]);
        assert!(c.check_thresholds(&t).is_ok());
    }

    #[test]
    fn eval_expr_fills_defaults_without_touching_the_row() {
        let r = row(&[("debt_ratio", Value::Float(95.0))]);
        let t = ThresholdTable::default();
        assert!(eval_expr("Debt_Ratio > {DEBT_P80}", &r, &t));
        // 이용금액_신용_B0M is absent → 0.0
        assert!(eval_expr("이용금액_신용_B0M == 0", &r, &t));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn eval_expr_never_panics_on_garbage() {
        let r = FeatureRow::new();
        let t = ThresholdTable::default();
        for src in [
            "",
            "((((",
            "__import__('os').system('ls')",
            "open('/etc/passwd').read()",
            "debt_ratio.__class__",
            "1 / 0",
            "math.exp(10000)",
            "'a' < 1",
            "lambda: 1",
        ] {
            assert!(!eval_expr(src, &r, &t), "{src}");
        }
    }

    #[test]
    fn placeholder_matches_direct_comparison() {
        let t = ThresholdTable::default();
        let r = FeatureRow::new();
        for (name, value) in t.iter() {
            let expected = value > 0.0;
            assert_eq!(eval_expr(&format!("{{{name}}} > 0"), &r, &t), expected, "{name}");
        }
    }
}
