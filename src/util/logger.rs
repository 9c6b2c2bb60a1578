//! This module provides a built-in logger implementation.
//!
//! The built-in logger implementation uses the `env_logger` crate.  It is
//! enabled by the Cargo feature "builtin_env_logger" which is enabled by
//! default.  When enabled, it will be initialized when the heap is created
//! and will show logs of levels INFO or lower (the lower, the more
//! important). An embedder that integrates the collector with an existing
//! logging framework can disable the feature and register its own
//! implementation with the `log` crate.

/// Attempt to init an env_logger for the collector.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                // By default, show info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    debug!("gengc initialized the logger.");
                }
                Err(e) => {
                    // `log::SetLoggerError` can only be raised for one reason: the logger has already been initialized.
                    debug!("gengc failed to initialize the built-in env_logger: {e}");
                }
            }
        } else {
            debug!("gengc didn't initialize the built-in env_logger.  The Cargo feature \"builtin_env_logger\" is not enabled.");
        }
    }
}
