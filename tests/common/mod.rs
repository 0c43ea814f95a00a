use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary, filtered by
/// `RUST_LOG` (off by default). Mirrors the teacher's own `trace_init`
/// test helper.
pub fn trace_init() {
    INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "off".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .try_init();
    });
}
