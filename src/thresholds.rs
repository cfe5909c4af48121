//! # Threshold Store
//!
//! Named numeric cutoffs referenced by rules as `{NAME}` placeholders.
//!
//! - `ThresholdTable` is an immutable snapshot; scoring borrows one for the
//!   whole call so it never observes a half-applied refresh.
//! - `ThresholdStore` publishes snapshots behind `RwLock<Arc<_>>`: readers clone
//!   the `Arc`, `refresh()` builds a complete new table and swaps it in.
//! - `ThresholdStats` carries population summaries (`<metric>_q` quantile
//!   arrays, `<metric>_mu`/`<metric>_sigma`) used to recalibrate.

use chrono::{DateTime, Utc};
use crate::metrics::{THRESHOLD_GENERATION, THRESHOLD_REFRESH_TOTAL};
use metrics::{counter, gauge};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const DEFAULT_THRESHOLDS: &[(&str, f64)] = &[
    ("LIQ_P20", 30.0),
    ("LIQ_P80", 70.0),
    ("DEBT_P80", 80.0),
    ("DEBT_P50", 50.0),
    ("NEC_P80", 0.8),
    ("NEC_P20", 0.2),
    ("STRESS_HIGH", 70.0),
    ("HOUSING_P70", 0.3),
    ("MEDICAL_P80", 0.2),
    ("CREDIT_USAGE_P90", 90.0),
    ("REVOLVING_P70", 0.7),
];

/// `(stats key, quantile index, threshold)`
const QUANTILE_BINDINGS: &[(&str, usize, &str)] = &[
    ("liquidity_score_q", 1, "LIQ_P20"),
    ("liquidity_score_q", 5, "LIQ_P80"),
    ("debt_ratio_q", 5, "DEBT_P80"),
    ("debt_ratio_q", 2, "DEBT_P50"),
    ("necessity_ratio_q", 5, "NEC_P80"),
    ("necessity_ratio_q", 0, "NEC_P20"),
    ("housing_ratio_q", 4, "HOUSING_P70"),
    ("medical_ratio_q", 5, "MEDICAL_P80"),
    ("credit_usage_ratio_q", 6, "CREDIT_USAGE_P90"),
    ("revolving_dependency_q", 4, "REVOLVING_P70"),
];

/// `(metric, sigma multiplier, threshold)`: threshold = mu + k * sigma
const MEAN_STD_BINDINGS: &[(&str, f64, &str)] = &[("stress_index", 1.0, "STRESS_HIGH")];

static STATS_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<metric>[a-z][a-z0-9_]*?)_(?P<kind>q|mu|sigma)$").expect("stats key regex"));

static THRESHOLD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("threshold name regex"));

pub fn is_valid_threshold_name(name: &str) -> bool {
    THRESHOLD_NAME_RE.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Default,
    Calibrated,
}

/// Immutable threshold snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdTable {
    values: BTreeMap<String, f64>,
    state: TableState,
    generation: u64,
    calibrated_at: Option<DateTime<Utc>>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            values: DEFAULT_THRESHOLDS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            state: TableState::Default,
            generation: 0,
            calibrated_at: None,
        }
    }
}

impl ThresholdTable {
    /// Defaults with `overrides` applied on top. Overrides stay in the
    /// `Default` state: they're configuration, not calibration.
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut t = Self::default();
        for (k, v) in overrides {
            t.values.insert(k, v);
        }
        t
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Snapshot value, then the builtin default, then NaN so that any
    /// comparison against it is false.
    pub fn resolve(&self, name: &str) -> f64 {
        self.get(name)
            .or_else(|| default_threshold(name))
            .unwrap_or(f64::NAN)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name) || default_threshold(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn calibrated_at(&self) -> Option<DateTime<Utc>> {
        self.calibrated_at
    }

    /// Build the next table from `stats`. Entries that can't be applied are
    /// skipped and reported; `self` is untouched.
    pub fn recalibrated(&self, stats: &ThresholdStats) -> (ThresholdTable, RefreshReport) {
        let mut next = self.clone();
        let mut report = RefreshReport::default();

        for (key, idx, name) in QUANTILE_BINDINGS {
            let Some(entry) = stats.0.get(*key) else {
                continue;
            };
            match entry {
                StatValue::Quantiles(qs) => match qs.get(*idx) {
                    Some(v) if v.is_finite() => report.apply(&mut next, name, *v),
                    Some(_) => report.skip(format!("{key}[{idx}] is not finite")),
                    None => report.skip(format!(
                        "{key} has {} values, index {idx} needed for {name}",
                        qs.len()
                    )),
                },
                StatValue::Scalar(_) => report.skip(format!("{key} must be a quantile array")),
            }
        }

        for (metric, k, name) in MEAN_STD_BINDINGS {
            let mu = stats.scalar(&format!("{metric}_mu"));
            let sigma = stats.scalar(&format!("{metric}_sigma"));
            match (mu, sigma) {
                (Some(m), Some(s)) if m.is_finite() && s.is_finite() => {
                    report.apply(&mut next, name, m + k * s)
                }
                (Some(_), Some(_)) => report.skip(format!("{metric} mu/sigma not finite")),
                (None, None) => {}
                _ => report.skip(format!("{metric} needs both _mu and _sigma")),
            }
        }

        for key in stats.0.keys() {
            if !STATS_KEY_RE.is_match(key) {
                report.skip(format!("unrecognized stats key `{key}`"));
            } else if !is_bound_key(key) {
                debug!(target: "scenario::thresholds", %key, "stats key has no threshold binding");
            }
        }

        if !report.updated.is_empty() {
            next.state = TableState::Calibrated;
            next.generation = self.generation + 1;
            next.calibrated_at = Some(Utc::now());
        }
        (next, report)
    }
}

fn default_threshold(name: &str) -> Option<f64> {
    DEFAULT_THRESHOLDS
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| *v)
}

fn is_bound_key(key: &str) -> bool {
    QUANTILE_BINDINGS.iter().any(|(k, _, _)| *k == key)
        || MEAN_STD_BINDINGS
            .iter()
            .any(|(m, _, _)| key == format!("{m}_mu") || key == format!("{m}_sigma"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Quantiles(Vec<f64>),
    Scalar(f64),
}

/// Population summaries keyed like `liquidity_score_q` or `stress_index_mu`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdStats(pub HashMap<String, StatValue>);

impl ThresholdStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantiles(mut self, key: impl Into<String>, qs: Vec<f64>) -> Self {
        self.0.insert(key.into(), StatValue::Quantiles(qs));
        self
    }

    pub fn scalar_value(mut self, key: impl Into<String>, v: f64) -> Self {
        self.0.insert(key.into(), StatValue::Scalar(v));
        self
    }

    fn scalar(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(StatValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read stats at {}: {}", path.display(), e))?;
        let stats = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid stats JSON at {}: {}", path.display(), e))?;
        Ok(stats)
    }
}

/// What a refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub updated: Vec<(String, f64)>,
    pub skipped: Vec<String>,
}

impl RefreshReport {
    fn apply(&mut self, table: &mut ThresholdTable, name: &str, value: f64) {
        table.values.insert(name.to_string(), value);
        self.updated.push((name.to_string(), value));
    }

    fn skip(&mut self, why: String) {
        warn!(target: "scenario::thresholds", reason = %why, "stats entry skipped");
        self.skipped.push(why);
    }
}

/// Shared, swappable threshold table.
#[derive(Debug, Clone)]
pub struct ThresholdStore {
    inner: Arc<RwLock<Arc<ThresholdTable>>>,
}

impl Default for ThresholdStore {
    fn default() -> Self {
        Self::new(ThresholdTable::default())
    }
}

impl ThresholdStore {
    pub fn new(table: ThresholdTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// Current snapshot. A poisoned lock still yields the last published table.
    pub fn snapshot(&self) -> Arc<ThresholdTable> {
        match self.inner.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Recalibrate from `stats` and publish the result atomically.
    pub fn refresh(&self, stats: &ThresholdStats) -> RefreshReport {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (next, report) = guard.recalibrated(stats);
        if !report.updated.is_empty() {
            counter!(THRESHOLD_REFRESH_TOTAL).increment(1);
            gauge!(THRESHOLD_GENERATION).set(next.generation as f64);
            info!(
                target: "scenario::thresholds",
                generation = next.generation,
                updated = report.updated.len(),
                skipped = report.skipped.len(),
                "thresholds recalibrated"
            );
            *guard = Arc::new(next);
        }
        report
    }

    /// Alias kept for callers that think in terms of the stats loader.
    pub fn load_from_stats(&self, stats: &ThresholdStats) -> RefreshReport {
        self.refresh(stats)
    }
}

/// Poll `path` every 2s and refresh `store` whenever the file's mtime moves.
/// The file as it stands at spawn time is assumed loaded already; a file that
/// doesn't exist yet is applied once it appears.
pub fn start_stats_watch_thread(store: ThresholdStore, path: PathBuf) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let poll = Duration::from_secs(2);
        let mut last_mtime: Option<SystemTime> =
            fs::metadata(&path).and_then(|m| m.modified()).ok();

        loop {
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(mtime) => {
                    if last_mtime != Some(mtime) {
                        match ThresholdStats::load_from_file(&path) {
                            Ok(stats) => {
                                store.refresh(&stats);
                            }
                            Err(e) => {
                                warn!(target: "scenario::thresholds", error = %e, "stats reload failed")
                            }
                        }
                        last_mtime = Some(mtime);
                    }
                }
                Err(_) => {
                    // File missing or unreadable; keep trying.
                }
            }
            thread::sleep(poll);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let t = ThresholdTable::default();
        assert_eq!(t.get("LIQ_P20"), Some(30.0));
        assert_eq!(t.get("STRESS_HIGH"), Some(70.0));
        assert_eq!(t.state(), TableState::Default);
        assert_eq!(t.iter().count(), DEFAULT_THRESHOLDS.len());
        assert_eq!(t.calibrated_at(), None);
    }

    #[test]
    fn unknown_threshold_resolves_to_nan() {
        let t = ThresholdTable::default();
        assert!(t.resolve("NOT_A_THRESHOLD").is_nan());
        assert!(!t.contains("NOT_A_THRESHOLD"));
    }

    #[test]
    fn quantile_and_mean_std_bindings() {
        let stats = ThresholdStats::new()
            .quantiles("liquidity_score_q", vec![0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0])
            .scalar_value("stress_index_mu", 50.0)
            .scalar_value("stress_index_sigma", 12.5);
        let (next, report) = ThresholdTable::default().recalibrated(&stats);
        assert_eq!(next.get("LIQ_P20"), Some(5.0));
        assert_eq!(next.get("LIQ_P80"), Some(25.0));
        assert_eq!(next.get("STRESS_HIGH"), Some(62.5));
        assert_eq!(next.get("DEBT_P80"), Some(80.0));
        assert_eq!(next.state(), TableState::Calibrated);
        assert_eq!(next.generation(), 1);
        assert!(next.calibrated_at().is_some());
        assert_eq!(report.updated.len(), 3);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn short_arrays_and_half_pairs_are_skipped() {
        let stats = ThresholdStats::new()
            .quantiles("credit_usage_ratio_q", vec![1.0, 2.0, 3.0])
            .scalar_value("stress_index_mu", 50.0);
        let (next, report) = ThresholdTable::default().recalibrated(&stats);
        assert_eq!(next.get("CREDIT_USAGE_P90"), Some(90.0));
        assert_eq!(next.get("STRESS_HIGH"), Some(70.0));
        assert!(report.updated.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(next.state(), TableState::Default);
    }

    #[test]
    fn non_finite_values_are_skipped() {
        let stats = ThresholdStats::new()
            .quantiles("debt_ratio_q", vec![0.0, 1.0, f64::NAN, 3.0, 4.0, 99.0, 100.0]);
        let (next, report) = ThresholdTable::default().recalibrated(&stats);
        assert_eq!(next.get("DEBT_P50"), Some(50.0));
        assert_eq!(next.get("DEBT_P80"), Some(99.0));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn store_swaps_atomically_and_old_snapshots_survive() {
        let store = ThresholdStore::default();
        let before = store.snapshot();
        store.refresh(
            &ThresholdStats::new().quantiles("housing_ratio_q", vec![0.0, 0.1, 0.2, 0.3, 0.45, 0.5, 0.6]),
        );
        let after = store.snapshot();
        assert_eq!(before.get("HOUSING_P70"), Some(0.3));
        assert_eq!(after.get("HOUSING_P70"), Some(0.45));
        assert_eq!(after.generation(), before.generation() + 1);
    }

    #[test]
    fn stats_json_shape() {
        let raw = r#"{"debt_ratio_q":[1,2,3,4,5,6,7],"stress_index_mu":60.0,"stress_index_sigma":5}"#;
        let stats: ThresholdStats = serde_json::from_str(raw).unwrap();
        assert_eq!(
            stats.0.get("stress_index_sigma"),
            Some(&StatValue::Scalar(5.0))
        );
        assert!(matches!(stats.0.get("debt_ratio_q"), Some(StatValue::Quantiles(q)) if q.len() == 7));
    }

    #[test]
    fn unrecognized_keys_are_reported() {
        let stats = ThresholdStats::new().scalar_value("Weird Key", 1.0);
        let (_, report) = ThresholdTable::default().recalibrated(&stats);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn threshold_names() {
        assert!(is_valid_threshold_name("LIQ_P20"));
        assert!(!is_valid_threshold_name("liq_p20"));
        assert!(!is_valid_threshold_name("1ABC"));
    }
}
