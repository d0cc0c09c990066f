use tracing_subscriber::EnvFilter;

/// Initializes process-wide structured logging once, at the very start of
/// `main` (§4.14): `RUST_LOG`-driven level filtering, defaulting to `info`,
/// with the default text formatter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
