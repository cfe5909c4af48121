// tests/config_env.rs
//
// EngineConfig::load resolution and ScenarioEngine::from_config with real
// files. Env-mutating tests are serialized.

use finance_scenario_engine::config::{
    ENV_CONFIG_PATH, ENV_EPSILON, ENV_FALLBACK_LABEL, ENV_RULES_PATH, ENV_STATS_PATH,
};
use finance_scenario_engine::{EngineConfig, FeatureRow, ScenarioEngine, Value};
use std::path::Path;
use std::{env, fs};

fn clear_env() {
    for k in [
        ENV_CONFIG_PATH,
        ENV_RULES_PATH,
        ENV_STATS_PATH,
        ENV_EPSILON,
        ENV_FALLBACK_LABEL,
    ] {
        env::remove_var(k);
    }
}

const RENT_RULES: &str = r#"{
  "fields": { "월세비율": "rent_ratio" },
  "rules": [
    { "name": "rent_pressure", "label": "rent_pressure", "threshold": 1,
      "gate": ["월세비율 > 0"],
      "signals": [ { "expr": "월세비율 >= {RENT_HIGH}", "weight": 1 } ] }
  ]
}"#;

fn write(dir: &Path, name: &str, body: &str) -> String {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p.display().to_string()
}

#[serial_test::serial]
#[test]
fn load_prefers_env_path_and_env_overrides() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let cfg_path = write(
        tmp.path(),
        "engine.toml",
        r#"
[engine]
fallback_label = "calm"
epsilon = 0.5
"#,
    );

    env::set_var(ENV_CONFIG_PATH, &cfg_path);
    let cfg = EngineConfig::load().unwrap();
    assert_eq!(cfg.engine.fallback_label, "calm");
    assert_eq!(cfg.engine.epsilon, 0.5);

    env::set_var(ENV_FALLBACK_LABEL, "no_scenario");
    env::set_var(ENV_EPSILON, "0.001");
    let cfg = EngineConfig::load().unwrap();
    assert_eq!(cfg.engine.fallback_label, "no_scenario");
    assert_eq!(cfg.engine.epsilon, 0.001);

    clear_env();
}

#[serial_test::serial]
#[test]
fn load_fails_on_missing_env_path_and_bad_values() {
    clear_env();
    env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/engine.toml");
    let err = EngineConfig::load().unwrap_err();
    assert!(err.to_string().contains(ENV_CONFIG_PATH), "{err}");

    let tmp = tempfile::tempdir().unwrap();
    env::set_var(ENV_CONFIG_PATH, write(tmp.path(), "engine.toml", ""));
    env::set_var(ENV_EPSILON, "-1");
    assert!(EngineConfig::load().is_err());

    clear_env();
}

#[serial_test::serial]
#[test]
fn load_without_any_file_is_defaults() {
    clear_env();
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    let cfg = EngineConfig::load();

    env::set_current_dir(&old).unwrap();
    assert_eq!(cfg.unwrap(), EngineConfig::default());
}

#[serial_test::serial]
#[test]
fn from_config_wires_rules_stats_and_overrides() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let rules = write(tmp.path(), "rules.json", RENT_RULES);
    let stats = write(
        tmp.path(),
        "stats.json",
        r#"{"liquidity_score_q":[0,5,10,15,20,25,30]}"#,
    );

    env::set_var(ENV_RULES_PATH, &rules);
    env::set_var(ENV_STATS_PATH, &stats);
    let mut cfg = EngineConfig::from_toml_str("[thresholds.overrides]\nRENT_HIGH = 0.4").unwrap();
    cfg.apply_env_overrides(|k| env::var(k).ok()).unwrap();
    clear_env();

    let e = ScenarioEngine::from_config(&cfg).unwrap();
    assert_eq!(e.rules().len(), 1);
    let snap = e.store().snapshot();
    assert_eq!(snap.get("LIQ_P20"), Some(5.0));
    assert_eq!(snap.get("RENT_HIGH"), Some(0.4));
    assert_eq!(snap.generation(), 1);

    let mut row = FeatureRow::new();
    row.insert("월세비율".into(), Value::Float(0.45));
    let r = e.score_scenarios(&row, "");
    assert_eq!(r.label, "rent_pressure");
    assert_eq!(r.probability, 0.731);
    assert_eq!(r.key_metrics["월세비율 >= {RENT_HIGH}"], "rent_ratio=0.45");
}

#[test]
fn unknown_placeholder_fails_startup() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = EngineConfig::default();
    cfg.rules.path = Some(tmp.path().join("rules.json"));
    fs::write(cfg.rules.path.as_ref().unwrap(), RENT_RULES).unwrap();

    let err = ScenarioEngine::from_config(&cfg).unwrap_err();
    assert!(format!("{err:#}").contains("RENT_HIGH"), "{err:#}");
}

#[test]
fn missing_stats_file_fails_startup() {
    let mut cfg = EngineConfig::default();
    cfg.thresholds.stats_path = Some("/definitely/not/here/stats.json".into());
    assert!(ScenarioEngine::from_config(&cfg).is_err());
}
