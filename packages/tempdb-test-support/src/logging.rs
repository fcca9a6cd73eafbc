//! Unified test logging initialization
//!
//! Shared by every integration test binary through a `ctor` hook in
//! `tests/common/mod.rs`.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Initialize structured logging for tests.
///
/// Idempotent and race-safe. The filter is read in this order:
///
/// 1. `TEST_LOG` environment variable (preferred)
/// 2. `RUST_LOG` environment variable (fallback)
/// 3. `"warn"` (default, quiet)
///
/// `TEST_LOG_FORMAT=json` switches to JSON lines.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        let filter = std::env::var("TEST_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .map(EnvFilter::new)
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        let json = std::env::var("TEST_LOG_FORMAT").is_ok_and(|f| f == "json");
        let builder = fmt()
            .with_env_filter(filter)
            .with_test_writer() // Critical for cargo/nextest capture
            .without_time();

        if json {
            builder.json().try_init().ok();
        } else {
            builder.try_init().ok();
        }
    });
}
