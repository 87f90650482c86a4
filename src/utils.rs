#[cfg(feature = "logging")]
const ENV_LOG: &str = "TASKWIRE_LOG";

/// Installs a `tracing` subscriber filtered by the `TASKWIRE_LOG` environment
/// variable, `info` when unset.
///
/// Fails if a global subscriber has already been installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), crate::RuntimeError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .try_init()?;

    Ok(())
}
