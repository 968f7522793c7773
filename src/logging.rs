//! Logger bootstrap for the `walletvault` binary.
//!
//! Library code only talks to the `log` facade; the binary starts a
//! `flexi_logger` backend writing to stderr.  `RUST_LOG` overrides the
//! configured level.

use flexi_logger::{Logger, LoggerHandle};

use crate::errors::{Result, WalletError};

/// Start stderr logging at `level` (a `log` filter spec such as `"warn"`
/// or `"walletvault=debug"`).
///
/// The returned handle must be kept alive for as long as logging is needed.
pub fn init_logging(level: &str) -> Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str(level)
        .map_err(|e| WalletError::ConfigError(format!("invalid log level `{level}`: {e}")))?
        .log_to_stderr()
        .format(flexi_logger::default_format)
        .start()
        .map_err(|e| WalletError::ConfigError(format!("failed to start logger: {e}")))?;

    log::debug!(
        "event=start version={} level={level}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(handle)
}
