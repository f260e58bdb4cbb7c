//! Logging setup shared by the Duet binaries.
//!
//! Libraries in this workspace only depend on the `log` facade. Binaries call
//! [`init`] once at startup to install a `free_log_client` layer.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub use log;

#[cfg(feature = "macros")]
mod macros;

#[cfg(feature = "free_log")]
mod free_log {
    use std::path::PathBuf;

    use duet_env_utils::default_env;
    use free_log_client::FreeLogLayer;
    use thiserror::Error;

    pub use free_log_client;

    #[cfg(debug_assertions)]
    const DEFAULT_LOG_LEVEL: &str = "duet=trace";
    #[cfg(not(debug_assertions))]
    const DEFAULT_LOG_LEVEL: &str = "duet=info";

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error(transparent)]
        Logs(#[from] free_log_client::LogsInitError),
        #[error(transparent)]
        BuildLogsConfig(#[from] free_log_client::BuildLogsConfigError),
        #[error(transparent)]
        BuildFileWriterConfig(#[from] free_log_client::BuildFileWriterConfigError),
    }

    /// Returns `~/.local/duet/logs`, creating it if needed.
    #[must_use]
    pub fn make_log_dir_path() -> Option<PathBuf> {
        let path = home::home_dir()?.join(".local").join("duet").join("logs");

        if path.is_dir() || std::fs::create_dir_all(&path).is_ok() {
            Some(path)
        } else {
            None
        }
    }

    /// Resolves the env filter: `DUET_LOG`, then `RUST_LOG`, then the build default.
    #[must_use]
    pub fn env_filter() -> String {
        default_env("DUET_LOG", &default_env("RUST_LOG", DEFAULT_LOG_LEVEL))
    }

    /// Installs the global logger.
    ///
    /// When `filename` is given, debug-level output is also written to that
    /// file under [`make_log_dir_path`].
    ///
    /// # Errors
    ///
    /// * If the logs config or file writer config is invalid
    /// * If a global logger was already installed
    pub fn init(filename: Option<&str>) -> Result<FreeLogLayer, InitError> {
        let mut logs_config = free_log_client::LogsConfig::builder();

        if let Some(filename) = filename {
            if let Some(log_dir) = make_log_dir_path() {
                logs_config = logs_config.with_file_writer(
                    free_log_client::FileWriterConfig::builder()
                        .file_path(log_dir.join(filename))
                        .log_level(free_log_client::Level::Debug),
                )?;
            } else {
                log::warn!("Could not get a log dir to put the logs into");
            }
        }

        let filter = env_filter();
        let layer = free_log_client::init(logs_config.env_filter(filter.as_str()))?;

        Ok(layer)
    }
}

#[cfg(feature = "free_log")]
pub use free_log::*;

#[cfg(all(test, feature = "free_log"))]
mod tests {
    use super::*;

    #[test_log::test]
    fn env_filter_is_never_empty() {
        assert!(!env_filter().is_empty());
    }
}
