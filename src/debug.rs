//! Tracing setup and the dev-only decision log helpers.

use std::fmt::Write as _;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_DEV_LOG: &str = "SCENARIO_DEV_LOG";
pub const ENV_LOG_JSON: &str = "SCENARIO_LOG_JSON";
pub const ENV_APP_ENV: &str = "APP_ENV";
pub const DEFAULT_LOG_FILTER: &str = "scenario=info,warn";

/// Install a global subscriber for binaries. `RUST_LOG` wins over the
/// default filter; `SCENARIO_LOG_JSON=1` switches to JSON lines. Calling it
/// twice is harmless.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(ENV_LOG_JSON).ok().as_deref() == Some("1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

// SCENARIO_DEV_LOG=1 AND dev env (debug build or APP_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    is_dev_env(std::env::var(ENV_APP_ENV).ok().as_deref())
}

fn is_dev_env(app_env: Option<&str>) -> bool {
    matches!(
        app_env.unwrap_or_default().to_ascii_lowercase().as_str(),
        "local" | "development" | "dev"
    )
}

/// First 6 bytes of SHA-256 as 12 hex chars. Stands in for user text in logs.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub(crate) fn truncate_vec<T: ToString>(v: &[T], max: usize) -> Vec<String> {
    v.iter().take(max).map(|x| x.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_hash_is_stable_and_short() {
        let a = anon_hash("통장 잔고가 바닥이에요");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash("통장 잔고가 바닥이에요"));
        assert_ne!(a, anon_hash("different"));
        // sha256("") = e3b0c442 98fc...
        assert_eq!(anon_hash(""), "e3b0c44298fc");
    }

    #[test]
    fn dev_env_names() {
        assert!(is_dev_env(Some("Local")));
        assert!(is_dev_env(Some("dev")));
        assert!(!is_dev_env(Some("production")));
        assert!(!is_dev_env(None));
    }

    #[test]
    fn truncate_keeps_prefix() {
        assert_eq!(truncate_vec(&[1, 2, 3], 2), vec!["1", "2"]);
    }
}
