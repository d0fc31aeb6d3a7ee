use crate::config::schema::{InvalidConfig, PatcherConfig};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up in the base directory when none is given.
pub const CONFIG_FILE_NAME: &str = "aigen.toml";

/// Why a config could not be loaded. `origin` is `None` for in-memory text.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config TOML{}: {source}", describe(origin))]
    Toml {
        origin: Option<PathBuf>,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid config{}: {source}", describe(origin))]
    Validation {
        origin: Option<PathBuf>,
        #[source]
        source: InvalidConfig,
    },
}

fn describe(origin: &Option<PathBuf>) -> String {
    origin
        .as_ref()
        .map(|path| format!(" ({})", path.display()))
        .unwrap_or_default()
}

fn parse(input: &str, origin: Option<&Path>) -> Result<PatcherConfig, ConfigError> {
    let origin = || origin.map(Path::to_path_buf);
    let config: PatcherConfig =
        toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
            origin: origin(),
            source,
        })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation {
            origin: origin(),
            source,
        })?;
    Ok(config)
}

pub fn load_from_str(input: &str) -> Result<PatcherConfig, ConfigError> {
    parse(input, None)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatcherConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, Some(path))
}

/// Load `<base_dir>/aigen.toml`, or defaults when the file does not exist.
pub fn load_for_base(base_dir: impl AsRef<Path>) -> Result<PatcherConfig, ConfigError> {
    let path = base_dir.as_ref().join(CONFIG_FILE_NAME);
    if path.is_file() {
        load_from_path(&path)
    } else {
        Ok(PatcherConfig::default())
    }
}
