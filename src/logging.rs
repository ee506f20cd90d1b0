use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `verbose` when set:
/// 0 = info, 1+ = debug.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("noclist_lib=info,noclist_watch=info"),
        _ => EnvFilter::new("noclist_lib=debug,noclist_watch=debug"),
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
