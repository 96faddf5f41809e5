use std::sync::Once;

static INIT: Once = Once::new();

/// Install a `tracing` subscriber once per test binary. Each `#[test]`
/// function runs on its own thread, so the engine's thread-local state
/// starts fresh without any explicit reset.
pub fn setup() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
