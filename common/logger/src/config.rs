use crate::LoggerError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

pub const STDOUT_OUTPUT: &str = "stdout";
pub const STDERR_OUTPUT: &str = "stderr";

pub const DEFAULT_LEVEL: &str = "warn";
pub const DEFAULT_OUTPUT_PATH: &str = "log/log.txt";
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Defines the Logger configuration.
/// It is persisted as a JSON file; every missing field takes its default value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Sets the logger [`EnvFilter`](tracing_subscriber::EnvFilter).
    /// Valid values: trace, debug, info, warn, error
    /// Example of a valid filter: "warn,my_crate=info,my_crate::my_mod=debug,[my_span]=trace"
    pub level: String,

    /// How each record is rendered.
    pub encoding: LogEncoding,

    /// Where the records are written.
    /// "stdout" and "stderr" are reserved; any other value is a file path.
    pub output_paths: Vec<String>,

    /// Destinations that receive a copy of the ERROR records only.
    pub error_output_paths: Vec<String>,

    pub encoder: EncoderConfig,

    // If not set, the file outputs grow forever.
    pub rotation: Option<RotationConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_owned(),
            encoding: LogEncoding::Json,
            output_paths: vec![DEFAULT_OUTPUT_PATH.to_owned()],
            error_output_paths: vec![STDERR_OUTPUT.to_owned()],
            encoder: EncoderConfig::default(),
            rotation: Some(RotationConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    Json,
    Console,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LevelEncoding {
    /// e.g. "info"
    Lowercase,
    /// e.g. "INFO"
    Capital,
}

/// The key names and formats used by the encoder.
/// An empty key removes the entry from the output; the message key is never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub message_key: String,
    pub level_key: String,
    pub time_key: String,
    pub name_key: String,
    pub caller_key: String,
    pub level_encoding: LevelEncoding,
    /// A chrono strftime pattern, rendered in local time.
    pub time_format: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            message_key: "msg".to_owned(),
            level_key: "level".to_owned(),
            time_key: "ts".to_owned(),
            name_key: "logger".to_owned(),
            caller_key: "caller".to_owned(),
            level_encoding: LevelEncoding::Lowercase,
            time_format: DEFAULT_TIME_FORMAT.to_owned(),
        }
    }
}

/// Size based rotation of the file outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RotationConfig {
    /// Max size in megabytes of a log file before it is rotated; 0 disables the rotation.
    pub max_size_mb: u64,
    /// How many rotated files are kept; 0 keeps all of them.
    pub max_backups: usize,
    /// How many days a rotated file is kept; 0 keeps them regardless of their age.
    pub max_age_days: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { max_size_mb: 10, max_backups: 5, max_age_days: 30 }
    }
}

impl LoggerConfig {
    /// Returns the default configuration with the file output set to `path`.
    pub fn with_output_path<P: Into<String>>(path: P) -> Self {
        Self { output_paths: vec![path.into()], ..Default::default() }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoggerError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| LoggerError::ConfigFileReadError {
            path: path.display().to_string(),
            message: format!("{}", err),
        })?;
        let reader = BufReader::new(file);

        serde_json::from_reader(reader).map_err(|err| LoggerError::ConfigFileParseError {
            path: path.display().to_string(),
            message: format!("{}", err),
        })
    }

    /// Writes the configuration as pretty printed JSON,
    /// creating the parent folders when missing.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LoggerError> {
        let path = path.as_ref();
        create_parent_dir(path)?;

        let to_write_error = |err: String| LoggerError::ConfigFileWriteError {
            path: path.display().to_string(),
            message: err,
        };

        let data =
            serde_json::to_vec_pretty(self).map_err(|err| to_write_error(format!("{}", err)))?;
        let mut file = File::create(path).map_err(|err| to_write_error(format!("{}", err)))?;
        file.write_all(&data).map_err(|err| to_write_error(format!("{}", err)))?;
        file.flush().map_err(|err| to_write_error(format!("{}", err)))
    }
}

pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Loads the configuration from `path`.
/// If the file does not exist, `defaults` are saved to `path` and returned.
/// An existing file is never overwritten; if it cannot be parsed an error is returned.
pub fn load_or_create_config<P: AsRef<Path>>(
    path: P,
    defaults: LoggerConfig,
) -> Result<LoggerConfig, LoggerError> {
    let path = path.as_ref();
    if config_exists(path) {
        LoggerConfig::from_file(path)
    } else {
        tracing::debug!(
            "Logger config file [{}] not found. Creating it with the defaults",
            path.display()
        );
        defaults.save_to_file(path)?;
        Ok(defaults)
    }
}

/// Creates the folder containing `path`, if any.
pub(crate) fn create_parent_dir(path: &Path) -> Result<(), LoggerError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            std::fs::create_dir_all(dir).map_err(|err| LoggerError::DirectoryCreationError {
                path: dir.display().to_string(),
                message: format!("{}", err),
            })
        }
        _ => Ok(()),
    }
}
