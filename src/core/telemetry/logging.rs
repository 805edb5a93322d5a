use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global fmt subscriber. Safe to call more than once.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(env_filter).with_target(false).try_init();
}
