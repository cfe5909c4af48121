//! # Field Translator
//!
//! Maps the domain (Korean, source-table) field names used in rule text to
//! canonical snake_case row keys, and synthesizes defaults for keys a row
//! does not carry.
//!
//! - Translation is applied to identifier tokens of a parsed expression, never
//!   to raw substrings, so `납부_전체이용금액` and `납부_전체이용금액_전월` can't collide.
//! - Canonical names are accepted as-is, so rules may be written in either form.
//! - Defaults: `is_*`/`has_*` → `false`, `*count*` → `0`, everything else → `0.0`.
//! - Filling is additive: a present key is never removed or overwritten.

use crate::value::{FeatureRow, Value};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

static BUILTIN_FIELDS: &[(&str, &str)] = &[
    // customer
    ("발급회원번호", "user_id"),
    ("남녀구분코드", "gender"),
    ("연령", "age"),
    ("거주시도명", "residence"),
    ("직장시도명", "workplace"),
    ("마케팅동의여부", "marketing_agree"),
    // card usage
    ("이용카드수_신용", "credit_card_count"),
    ("이용카드수_체크", "check_card_count"),
    ("이용금액_R3M_신용", "credit_usage_3m"),
    ("이용금액_R3M_체크", "check_usage_3m"),
    ("_1순위카드이용금액", "top1_card_usage"),
    ("_2순위카드이용금액", "top2_card_usage"),
    ("최초한도금액", "first_limit_amount"),
    ("카드이용한도금액", "current_limit_amount"),
    ("CA한도금액", "ca_limit_amount"),
    // delinquency
    ("연체잔액_B0M", "delinquent_balance_b0m"),
    ("연체잔액_CA_B0M", "delinquent_balance_ca_b0m"),
    ("연체일수_최근", "recent_delinquent_days"),
    ("최종연체개월수_R15M", "max_delinquent_months_r15m"),
    ("회원여부_연체", "is_delinquent"),
    ("자발한도감액금액_R12M", "limit_down_amount_r12m"),
    ("강제한도감액금액_R12M", "forced_limit_down_amount_r12m"),
    ("한도증액금액_R12M", "limit_up_amount_r12m"),
    ("상향가능한도금액", "limit_up_available"),
    // balances
    ("잔액_B0M", "balance_b0m"),
    ("잔액_일시불_B0M", "balance_lump_b0m"),
    ("잔액_카드론_B0M", "balance_loan_b0m"),
    ("평잔_3M", "avg_balance_3m"),
    ("평잔_CA_3M", "avg_ca_balance_3m"),
    ("평잔_카드론_3M", "avg_loan_balance_3m"),
    ("CA이자율_할인전", "ca_interest_rate"),
    ("RV최소결제비율", "revolving_min_payment_ratio"),
    // spending pattern
    ("이용금액_쇼핑", "spending_shopping"),
    ("이용금액_요식", "spending_food"),
    ("이용금액_교통", "spending_transport"),
    ("이용금액_의료", "spending_medical"),
    ("이용금액_납부", "spending_payment"),
    ("Life_Stage", "life_stage"),
    ("카드신청건수", "card_application_count"),
    ("최종카드발급경과월", "last_card_issued_months_ago"),
    // scenario labels / ratios
    ("scenario_labels", "scenario_labels"),
    ("DTI_Estimate", "dti_estimate"),
    ("Spending_Change_Ratio", "spending_change_ratio"),
    ("Essential_Ratio", "essential_ratio"),
    ("Credit_Usage_Ratio", "credit_usage_ratio"),
    ("Debt_Ratio", "debt_ratio"),
    ("Revolving_Dependency", "revolving_dependency"),
    ("Necessity_Ratio", "necessity_ratio"),
    ("Housing_Ratio", "housing_ratio"),
    ("Medical_Ratio", "medical_ratio"),
    // derived
    ("RV_평균잔액_R3M", "avg_revolving_balance_3m"),
    ("RV잔액이월횟수_R3M", "revolving_count_3m"),
    ("Stress_Index", "stress_index"),
    ("연체일수_B1M", "delinquent_days_b1m"),
    ("연체원금_최근", "recent_delinquent_principal"),
    ("Liquidity_Score", "liquidity_score"),
    ("월별총승인금액", "monthly_approval_amount"),
    ("월별총승인건수", "monthly_approval_count"),
    ("이용금액_신용_B0M", "credit_usage_b0m"),
    ("납부_전체이용금액", "total_payment_amount"),
    ("납부_전체이용금액_전월", "total_payment_amount_prev_month"),
    ("쇼핑_온라인_이용금액", "online_shopping_amount"),
    ("쇼핑_전체_이용금액", "total_shopping_amount"),
    ("VIP등급코드", "vip_grade"),
];

static BUILTIN: Lazy<FieldTranslator> = Lazy::new(|| {
    FieldTranslator::empty().with_fields(
        BUILTIN_FIELDS
            .iter()
            .map(|(d, c)| (d.to_string(), c.to_string())),
    )
});

#[derive(Debug, Clone, Default)]
pub struct FieldTranslator {
    /// domain name → canonical key
    map: HashMap<String, String>,
    canonical: HashSet<String>,
}

impl FieldTranslator {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table shipped with the engine. Clone it to extend.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    /// Extend with extra `(domain, canonical)` pairs; later pairs win.
    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (domain, canonical) in fields {
            self.canonical.insert(canonical.clone());
            self.map.insert(domain, canonical);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve an identifier to its canonical key. Canonical keys map to
    /// themselves; unknown names yield `None`.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if let Some(c) = self.map.get(name) {
            return Some(c.as_str());
        }
        if self.canonical.contains(name) {
            return Some(name);
        }
        None
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.canonical_name(name).is_some()
    }

    /// Type-appropriate placeholder for a key missing from a row.
    pub fn default_for(&self, key: &str) -> Value {
        default_value_for(key)
    }

    /// Alias domain-named row keys to their canonical key when the canonical
    /// key is absent.
    pub fn normalize_keys(&self, row: &mut FeatureRow) {
        let aliases: Vec<(String, Value)> = row
            .iter()
            .filter_map(|(k, v)| {
                let canon = self.map.get(k)?;
                if canon == k || row.contains_key(canon) {
                    return None;
                }
                Some((canon.clone(), v.clone()))
            })
            .collect();
        for (k, v) in aliases {
            row.entry(k).or_insert(v);
        }
    }

    /// Inject defaults for every referenced key absent from `row`.
    /// Returns the keys that were filled.
    pub fn fill_defaults<'k, I>(&self, row: &mut FeatureRow, keys: I) -> Vec<&'k str>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut filled = Vec::new();
        for key in keys {
            if !row.contains_key(key) {
                row.insert(key.to_string(), self.default_for(key));
                filled.push(key);
            }
        }
        filled
    }

    /// Normalize domain keys, then fill defaults for `keys`.
    pub fn translate_and_fill<'k, I>(&self, mut row: FeatureRow, keys: I) -> FeatureRow
    where
        I: IntoIterator<Item = &'k str>,
    {
        self.normalize_keys(&mut row);
        let filled = self.fill_defaults(&mut row, keys);
        if !filled.is_empty() {
            tracing::trace!(target: "scenario::fields", filled = ?filled, "defaults injected");
        }
        row
    }
}

/// `is_*`/`has_*` → false, counts → 0, amounts and ratios → 0.0.
pub fn default_value_for(key: &str) -> Value {
    if key.starts_with("is_") || key.starts_with("has_") {
        Value::Bool(false)
    } else if key.contains("count") {
        Value::Int(0)
    } else {
        Value::Float(0.0)
    }
}
