//! Score one feature row from a JSON file (or stdin) and print the result.
//!
//! ```text
//! score_demo [ROW.json|-] [--message TEXT] [--explain] [--derive] [--metrics]
//! ```

use anyhow::{anyhow, Context, Result};
use finance_scenario_engine::debug::init_tracing;
use finance_scenario_engine::derive::enrich_derived_fields;
use finance_scenario_engine::metrics::Metrics;
use finance_scenario_engine::thresholds::start_stats_watch_thread;
use finance_scenario_engine::value::row_from_json;
use finance_scenario_engine::{EngineConfig, ScenarioEngine};
use std::io::Read;

#[derive(Debug, Default)]
struct Args {
    row_path: Option<String>,
    message: String,
    explain: bool,
    derive: bool,
    metrics: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--message" | "-m" => {
                args.message = it.next().ok_or_else(|| anyhow!("--message needs a value"))?;
            }
            "--explain" => args.explain = true,
            "--derive" => args.derive = true,
            "--metrics" => args.metrics = true,
            "-" => args.row_path = None,
            other if other.starts_with('-') => return Err(anyhow!("unknown flag {other}")),
            other => args.row_path = Some(other.to_string()),
        }
    }
    Ok(args)
}

fn read_row_source(path: Option<&str>) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("reading row from {p}")),
        None => {
            let mut s = String::new();
            std::io::stdin()
                .read_to_string(&mut s)
                .context("reading row from stdin")?;
            Ok(s)
        }
    }
}

fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = parse_args()?;
    let metrics = if args.metrics {
        Some(Metrics::init()?)
    } else {
        None
    };

    let cfg = EngineConfig::load()?;
    let engine = ScenarioEngine::from_config(&cfg)?;
    if cfg.thresholds.hot_reload {
        if let Some(path) = cfg.thresholds.stats_path.clone() {
            start_stats_watch_thread(engine.store().clone(), path);
        }
    }

    let mut row = row_from_json(&read_row_source(args.row_path.as_deref())?)?;
    if args.derive {
        enrich_derived_fields(&mut row);
    }

    let out = if args.explain {
        serde_json::to_string_pretty(&engine.explain(&row, &args.message))?
    } else {
        serde_json::to_string_pretty(&engine.score_scenarios(&row, &args.message))?
    };
    println!("{out}");

    if let Some(m) = metrics {
        eprintln!("{}", m.render());
    }
    Ok(())
}
