//! Alias configuration file and command-line value parsing.
//!
//! The file lives at `~/.goveewatch.conf` unless overridden and looks like:
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "GVH5075_ABCD", "alias": "Kitchen" }
//!   ]
//! }
//! ```
//!
//! A missing file is never treated as "no aliases": a skeleton is written and
//! the caller is told to stop so the user can fill it in.

use crate::alias::{Alias, AliasTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name under the user's home directory.
pub const CONFIG_FILE_NAME: &str = ".goveewatch.conf";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file did not exist; an empty skeleton has been written in its place.
    #[error("configuration file not found, generated empty configuration file: {}", .0.display())]
    Created(PathBuf),
    #[error("cannot locate home directory (HOME is not set)")]
    NoHomeDir,
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: invalid configuration: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub devices: Vec<Alias>,
}

impl Config {
    pub fn aliases(&self) -> AliasTable {
        AliasTable::new(&self.devices)
    }
}

/// `$HOME/.goveewatch.conf`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Load the configuration at `path`, writing a skeleton if it is absent.
///
/// # Errors
/// [`ConfigError::Created`] when the skeleton was just written. The caller is
/// expected to exit non-zero and let the user populate the file.
pub fn load_or_bootstrap(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        write_skeleton(path)?;
        return Err(ConfigError::Created(path.to_path_buf()));
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse(text: &str) -> Result<Config, serde_json::Error> {
    serde_json::from_str(text)
}

fn write_skeleton(path: &Path) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut text = serde_json::to_string_pretty(&Config::default()).map_err(|e| io_err(e.into()))?;
    text.push('\n');
    fs::write(path, text).map_err(io_err)
}

/// Parse a duration such as `2s`, `500ms`, `1m` or `1h`.
///
/// A bare number is read as seconds.
///
/// # Examples
/// ```
/// use goveewatch::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_duration("750ms").unwrap(), Duration::from_millis(750));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, unit_ms) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1_000)
    } else {
        (src, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration too large: {src}"))
}

/// Parse the scan window length. A zero window would spin the loop.
pub fn parse_dwell(src: &str) -> Result<Duration, String> {
    let dwell = parse_duration(src)?;
    if dwell.is_zero() {
        return Err("scan window must be longer than zero".to_string());
    }
    Ok(dwell)
}
