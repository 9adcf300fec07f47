//! Log output for tests, written to the test runner's captured stdout.

use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "WARN,filestore_stresstest=DEBUG,filestore_test=DEBUG";

/// Installs a global subscriber for the test binary.
///
/// `RUST_LOG` selects what is logged. Without it, only warnings are shown, except for the
/// stresstest crates which log at `DEBUG`. Calling this more than once is harmless.
///
/// ```
/// filestore_test::tracing::init();
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// Logs everything down to `DEBUG` on the current thread until the guard is dropped.
///
/// Use this with the current-thread test runtime to run code paths that only execute when debug
/// logging is enabled.
pub fn debug_scope() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .compact()
        .finish()
        .set_default()
}
