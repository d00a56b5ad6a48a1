//! Runtime configuration resolved from flags, environment and defaults.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cli::Cli;
use crate::logging::{default_log_level, normalize_level};
use crate::store::DEFAULT_CAPACITY_BYTES;

const DATA_DIR_NAME: &str = ".taskboard";
const LOG_DIR_NAME: &str = "logs";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("storage capacity must be greater than zero")]
    ZeroCapacity,

    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    LogLevel(String),

    #[error("cannot resolve data directory: {0}")]
    DataDir(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// One file per storage key lives here.
    pub data_dir: PathBuf,
    pub capacity_bytes: usize,
    pub log_level: &'static str,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Resolve from parsed flags. clap already folded in `TASKBOARD_HOME`,
    /// `TASKBOARD_CAPACITY` and `TASKBOARD_LOG`.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|err| ConfigError::DataDir(err.to_string()))?;
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::resolve(
            cli.data_dir.as_deref(),
            cli.capacity,
            cli.log_level.as_deref(),
            home.as_deref(),
            &cwd,
        )
    }

    fn resolve(
        data_dir: Option<&Path>,
        capacity: Option<usize>,
        log_level: Option<&str>,
        home: Option<&Path>,
        cwd: &Path,
    ) -> Result<Self, ConfigError> {
        let data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => home
                .map(|home| home.join(DATA_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME)),
        };
        // Log files need an absolute directory.
        let data_dir = if data_dir.is_absolute() {
            data_dir
        } else {
            cwd.join(data_dir)
        };

        let capacity_bytes = capacity.unwrap_or(DEFAULT_CAPACITY_BYTES);
        if capacity_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let log_level = match log_level {
            Some(level) => {
                normalize_level(level).ok_or_else(|| ConfigError::LogLevel(level.to_string()))?
            }
            None => default_log_level(),
        };

        Ok(Self {
            log_dir: data_dir.join(LOG_DIR_NAME),
            data_dir,
            capacity_bytes,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_home() {
        let cfg = AppConfig::resolve(None, None, None, Some(Path::new("/home/ana")), Path::new("/tmp"))
            .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/home/ana/.taskboard"));
        assert_eq!(cfg.log_dir, PathBuf::from("/home/ana/.taskboard/logs"));
        assert_eq!(cfg.capacity_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.log_level, default_log_level());
    }

    #[test]
    fn explicit_values_win() {
        let cfg = AppConfig::resolve(
            Some(Path::new("boards/work")),
            Some(4096),
            Some(" WARNING "),
            Some(Path::new("/home/ana")),
            Path::new("/srv"),
        )
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/boards/work"));
        assert_eq!(cfg.capacity_bytes, 4096);
        assert_eq!(cfg.log_level, "warn");
    }

    #[test]
    fn missing_home_falls_back_to_cwd() {
        let cfg = AppConfig::resolve(None, None, None, None, Path::new("/work")).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/work/.taskboard"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cwd = Path::new("/");
        assert_eq!(
            AppConfig::resolve(None, Some(0), None, None, cwd),
            Err(ConfigError::ZeroCapacity)
        );
        assert_eq!(
            AppConfig::resolve(None, None, Some("loud"), None, cwd),
            Err(ConfigError::LogLevel("loud".into()))
        );
    }
}
