use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Installs the global tracing subscriber for `environment`.
///
/// `local` gets pretty, human-readable output at `debug`; `dev` and `prod` get
/// JSON lines at `info`. `RUST_LOG` overrides the default level.
pub fn init(environment: Environment) {
    let default_level = match environment {
        Environment::Local => "debug",
        Environment::Dev | Environment::Prod => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match environment {
        Environment::Local => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init(),
        Environment::Dev | Environment::Prod => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!(?environment, "Logging initialized");
}
