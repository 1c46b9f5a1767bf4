use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `EMVIZ_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for emviz handlers:
/// - Always include `owner` and `dataset` once the key has been decomposed.
/// - Include `key` on every per-notification event, `category` on catalog/gate events.
/// - Barrier decisions go to target `emviz_gate` with `observed` and `expected`.
/// - Aggregate writes include `output_key` and `output_sha256`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter = env_filter();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("EMVIZ_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
