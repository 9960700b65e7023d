//! Tracing subscriber setup.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Maps the CLI flags to a default level.
///
/// `RUST_LOG` still wins when it is set.
pub fn level_for(verbosity: u8, quiet: bool) -> Level {
    if quiet {
        return Level::WARN;
    }
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn filter_for(verbosity: u8, quiet: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity, quiet).as_str().to_lowercase()))
}

/// Installs the global subscriber, writing to stderr.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(verbosity: u8, quiet: bool) {
    let installed = tracing_subscriber::registry()
        .with(filter_for(verbosity, quiet))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
