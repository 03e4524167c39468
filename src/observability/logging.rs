//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Route panics (with a backtrace) through the log pipeline
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Log level comes from config unless `RUST_LOG` is set

use std::backtrace::Backtrace;
use std::sync::Once;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber and the panic hook.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directives(&config.log_level).into());

    let json = config.json_logs;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()?;

    install_panic_hook();
    Ok(())
}

fn default_directives(level: &str) -> String {
    format!("reverse_tunnel={level},warn")
}

static PANIC_HOOK: Once = Once::new();

/// Log panics with their stack trace. Handler panics are recovered by the
/// session, so this is the only place the trace surfaces.
///
/// Installs once per process; a hook set earlier by the embedding program
/// still runs afterwards.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture();
            tracing::error!(panic = %info, backtrace = %backtrace, "Panic");
            previous(info);
        }));
    });
}

pub(crate) fn panic_hook_installed() -> bool {
    PANIC_HOOK.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_scope_level_to_crate() {
        assert_eq!(default_directives("debug"), "reverse_tunnel=debug,warn");
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }

    #[test]
    fn panic_hook_installs_once() {
        install_panic_hook();
        install_panic_hook();
        assert!(panic_hook_installed());
    }
}
