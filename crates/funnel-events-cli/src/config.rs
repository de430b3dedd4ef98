//! Process settings loaded from a `KEY=VALUE` env file.
//!
//! Values in the file take precedence over the process environment, which
//! only fills keys the file leaves out. The file is never written back into
//! the environment.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use funnel_events_core::{parse_timestamp, TimeWindow};

pub const KEY_DB_NAME: &str = "DB_NAME";
pub const KEY_NUM_USERS: &str = "NUM_USERS";
pub const KEY_CSV_FILENAME: &str = "CSV_FILENAME";
pub const KEY_SEED: &str = "SEED";
pub const KEY_WINDOW_START: &str = "WINDOW_START";
pub const KEY_WINDOW_END: &str = "WINDOW_END";
pub const KEY_LOG_LEVEL: &str = "LOG_LEVEL";

const DEFAULT_LOG_LEVEL: &str = "info";
const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read env file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed line {line} in {}: expected KEY=VALUE", path.display())]
    Format { path: PathBuf, line: usize },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Parsed contents of an env file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    /// Reads and parses `path`.
    ///
    /// # Errors
    /// Returns [`ConfigError::NotFound`] when the file does not exist,
    /// [`ConfigError::Io`] on other read failures and
    /// [`ConfigError::Format`] for the first malformed line.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ConfigError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Self::parse(path, &body)
    }

    /// Parses env file text. Blank lines and `#` comments are skipped; later
    /// assignments of the same key win.
    ///
    /// # Errors
    /// Returns [`ConfigError::Format`] for a line without `=` or with an empty key.
    pub fn parse(path: &Path, body: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();

        for (index, raw) in body.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Format {
                    path: path.to_path_buf(),
                    line: index + 1,
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Format {
                    path: path.to_path_buf(),
                    line: index + 1,
                });
            }

            entries.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { entries })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub num_users: u64,
    pub export_path: PathBuf,
    pub seed: Option<u64>,
    pub window: TimeWindow,
    pub log_level: String,
}

impl Settings {
    /// Resolves settings from `file`, falling back to the process environment
    /// for keys the file does not set.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] or [`ConfigError::Invalid`] for absent
    /// or unparsable values.
    pub fn resolve(file: &EnvFile) -> Result<Self, ConfigError> {
        Self::resolve_with(file, |key| std::env::var(key).ok())
    }

    /// Like [`Settings::resolve`] with an explicit environment lookup.
    ///
    /// # Errors
    /// See [`Settings::resolve`].
    pub fn resolve_with<F>(file: &EnvFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| file.get(key).map(str::to_string).or_else(|| env(key));
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let db_path = with_extension_if_missing(&required(KEY_DB_NAME)?, "db");
        let export_path = with_extension_if_missing(&required(KEY_CSV_FILENAME)?, "csv");

        let raw_users = required(KEY_NUM_USERS)?;
        let num_users = parse_u64(KEY_NUM_USERS, &raw_users)?;
        if num_users == 0 {
            return Err(ConfigError::Invalid {
                key: KEY_NUM_USERS,
                value: raw_users,
                reason: "MUST be >= 1".to_string(),
            });
        }

        let seed = match lookup(KEY_SEED) {
            Some(raw) if !raw.trim().is_empty() => Some(parse_u64(KEY_SEED, &raw)?),
            _ => None,
        };

        let window = resolve_window(lookup(KEY_WINDOW_START), lookup(KEY_WINDOW_END))?;
        let log_level = lookup(KEY_LOG_LEVEL)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            db_path,
            num_users,
            export_path,
            seed,
            window,
            log_level,
        })
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: format!("{err}"),
    })
}

fn resolve_window(start: Option<String>, end: Option<String>) -> Result<TimeWindow, ConfigError> {
    let default = TimeWindow::default();

    let start = match start {
        Some(raw) => parse_timestamp(raw.trim()).map_err(|err| ConfigError::Invalid {
            key: KEY_WINDOW_START,
            value: raw,
            reason: err.to_string(),
        })?,
        None => default.start(),
    };
    let end = match end {
        Some(raw) => parse_timestamp(raw.trim()).map_err(|err| ConfigError::Invalid {
            key: KEY_WINDOW_END,
            value: raw,
            reason: err.to_string(),
        })?,
        None => default.end(),
    };

    TimeWindow::new(start, end).map_err(|err| ConfigError::Invalid {
        key: KEY_WINDOW_END,
        value: end.to_string(),
        reason: err.to_string(),
    })
}

// `events` -> `events.db`; names that already carry the extension are kept.
fn with_extension_if_missing(name: &str, extension: &str) -> PathBuf {
    let name = name.trim();
    if name == IN_MEMORY_DB {
        return PathBuf::from(name);
    }

    let path = PathBuf::from(name);
    if path
        .extension()
        .is_some_and(|current| current.eq_ignore_ascii_case(extension))
    {
        path
    } else {
        PathBuf::from(format!("{name}.{extension}"))
    }
}
