//! Derived fields the data layer computes before scoring.
//!
//! `liquidity_score = clamp(100 - 20 * balance_b0m / (avg_balance_3m + 0.001), 0, 100)`.
//! A null balance counts as 0, a null average as 0.001. A missing or
//! non-numeric input gives the neutral 50.0. Present values are never
//! overwritten.

use crate::value::{FeatureRow, Value};
use tracing::warn;

pub const LIQUIDITY_SCORE: &str = "liquidity_score";
pub const NEUTRAL_LIQUIDITY: f64 = 50.0;

const BALANCE: (&str, &str) = ("balance_b0m", "잔액_B0M");
const AVG_BALANCE: (&str, &str) = ("avg_balance_3m", "평잔_3M");
const LIQUIDITY_DOMAIN: &str = "Liquidity_Score";

/// Fill derived fields absent from `row`. Returns the keys that were added.
pub fn enrich_derived_fields(row: &mut FeatureRow) -> Vec<&'static str> {
    let mut added = Vec::new();
    if !row.contains_key(LIQUIDITY_SCORE) && !row.contains_key(LIQUIDITY_DOMAIN) {
        let score = liquidity_score(row);
        row.insert(LIQUIDITY_SCORE.to_string(), Value::Float(score));
        added.push(LIQUIDITY_SCORE);
    }
    added
}

pub fn liquidity_score(row: &FeatureRow) -> f64 {
    let (Some(balance), Some(avg)) = (lookup(row, BALANCE), lookup(row, AVG_BALANCE)) else {
        return NEUTRAL_LIQUIDITY;
    };
    let balance = match numeric_or(balance, 0.0) {
        Some(v) => v,
        None => return non_numeric(BALANCE.0, balance),
    };
    let avg = match numeric_or(avg, 0.001) {
        Some(v) => v,
        None => return non_numeric(AVG_BALANCE.0, avg),
    };

    let ratio = balance / (avg + 0.001);
    let score = 100.0 - ratio * 20.0;
    if score.is_nan() {
        return NEUTRAL_LIQUIDITY;
    }
    score.clamp(0.0, 100.0)
}

fn lookup<'a>(row: &'a FeatureRow, (canonical, domain): (&str, &str)) -> Option<&'a Value> {
    row.get(canonical).or_else(|| row.get(domain))
}

fn numeric_or(v: &Value, null_as: f64) -> Option<f64> {
    match v {
        Value::Null => Some(null_as),
        other => other.as_f64(),
    }
}

fn non_numeric(key: &str, v: &Value) -> f64 {
    warn!(target: "scenario::engine", %key, kind = v.type_name(), "liquidity input is not numeric");
    NEUTRAL_LIQUIDITY
}
