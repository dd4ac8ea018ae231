//! Tracing subscriber setup.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "RPGM_TRANSLATOR_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once per process.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Setting
/// `RPGM_TRANSLATOR_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_target(false))
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

