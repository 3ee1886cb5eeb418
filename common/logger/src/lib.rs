use crate::config::{load_or_create_config, STDERR_OUTPUT, STDOUT_OUTPUT};
use crate::encoder::EventEncoder;
use crate::rotation::{RotatingFileWriter, RotationLimits};
use crate::subscriber::{FilteredLayer, ToggleFilter};
use arc_swap::ArcSwap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::subscriber::set_global_default;
use tracing::{Level, Metadata, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

pub mod config;
pub mod encoder;
pub mod rotation;
pub mod subscriber;

pub use config::LoggerConfig;

type BaseSubscriber = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type OutputLayer = Box<dyn Layer<BaseSubscriber> + Send + Sync>;

static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("LoggerConfigurationError: [{message}]")]
    LoggerConfigurationError { message: String },
    #[error("ConfigFileReadError: cannot read [{path}]: [{message}]")]
    ConfigFileReadError { path: String, message: String },
    #[error("ConfigFileParseError: the content of [{path}] is not valid: [{message}]")]
    ConfigFileParseError { path: String, message: String },
    #[error("ConfigFileWriteError: cannot write [{path}]: [{message}]")]
    ConfigFileWriteError { path: String, message: String },
    #[error("DirectoryCreationError: cannot create [{path}]: [{message}]")]
    DirectoryCreationError { path: String, message: String },
    #[error("OutputError: cannot open the log output [{path}]: [{message}]")]
    OutputError { path: String, message: String },
    #[error("LoggerNotInitialized: the logger has not been set up yet")]
    LoggerNotInitialized,
}

impl From<log::SetLoggerError> for LoggerError {
    fn from(error: log::SetLoggerError) -> Self {
        LoggerError::LoggerConfigurationError { message: format!("{}", error) }
    }
}

impl From<std::io::Error> for LoggerError {
    fn from(error: std::io::Error) -> Self {
        LoggerError::LoggerConfigurationError { message: format!("{}", error) }
    }
}

/// A cheap, clonable handle to a configured logger.
#[derive(Clone)]
pub struct LoggerHandle {
    config: Arc<ArcSwap<LoggerConfig>>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
    console_enabled: Arc<AtomicBool>,
}

impl LoggerHandle {
    /// Returns the configuration currently in use.
    pub fn config(&self) -> Arc<LoggerConfig> {
        self.config.load_full()
    }

    /// Replaces the level filter of the logger.
    pub fn reload(&self, env_filter_str: &str) -> Result<(), LoggerError> {
        let env_filter = parse_env_filter(env_filter_str)?;
        self.reload_handle.reload(env_filter).map_err(|err| {
            LoggerError::LoggerConfigurationError {
                message: format!("Cannot reload the logger configuration. err: {:?}", err),
            }
        })?;

        let mut config = LoggerConfig::clone(&self.config.load());
        config.level = env_filter_str.to_owned();
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Enables or disables the "stdout" and "stderr" outputs.
    pub fn set_console_output(&self, enabled: bool) {
        self.console_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_console_output_enabled(&self) -> bool {
        self.console_enabled.load(Ordering::Relaxed)
    }
}

/// Keeps the background writers alive; when dropped, pending records are flushed.
pub struct LogWorkerGuard {
    #[allow(dead_code)]
    guards: Vec<WorkerGuard>,

    handle: LoggerHandle,
}

impl LogWorkerGuard {
    pub fn handle(&self) -> &LoggerHandle {
        &self.handle
    }

    pub fn reload(&self, env_filter_str: &str) -> Result<(), LoggerError> {
        self.handle.reload(env_filter_str)
    }
}

/// Reads the logger configuration from `config_path` and activates the logger.
/// If the file does not exist, it is created with the default configuration.
pub fn init<P: AsRef<Path>>(config_path: P) -> Result<LogWorkerGuard, LoggerError> {
    init_with_defaults(config_path, LoggerConfig::default())
}

/// Like [`init`], but `defaults` are used when the configuration file does not exist.
pub fn init_with_defaults<P: AsRef<Path>>(
    config_path: P,
    defaults: LoggerConfig,
) -> Result<LogWorkerGuard, LoggerError> {
    let logger_config = load_or_create_config(config_path, defaults)?;
    setup_logger(&logger_config)
}

/// Configures the underlying logger implementation and activates it.
pub fn setup_logger(logger_config: &LoggerConfig) -> Result<LogWorkerGuard, LoggerError> {
    let (subscriber, guard) = build_logger(logger_config)?;

    set_global_logger(subscriber)?;
    LOGGER.set(guard.handle.clone()).map_err(|_| LoggerError::LoggerConfigurationError {
        message: "The logger has already been set up".to_owned(),
    })?;

    tracing::info!("Logger configured with level [{}]", logger_config.level);
    Ok(guard)
}

/// Returns the handle of the logger activated by [`setup_logger`].
pub fn logger() -> Result<LoggerHandle, LoggerError> {
    LOGGER.get().cloned().ok_or(LoggerError::LoggerNotInitialized)
}

/// Builds the subscriber described by `logger_config` without activating it.
pub fn build_logger(
    logger_config: &LoggerConfig,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogWorkerGuard), LoggerError> {
    let env_filter = parse_env_filter(&logger_config.level)?;
    let (reloadable_env_filter, reload_handle) = reload::Layer::new(env_filter);

    let encoder = EventEncoder::new(logger_config.encoding, logger_config.encoder.clone())?;
    let console_enabled = Arc::new(AtomicBool::new(true));

    let rotation_limits =
        logger_config.rotation.as_ref().map(RotationLimits::try_from).transpose()?;

    let mut layers: Vec<OutputLayer> = vec![];
    let mut guards = vec![];
    let mut opened: Vec<&str> = vec![];

    for output in &logger_config.output_paths {
        if opened.contains(&output.as_str()) {
            continue;
        }
        opened.push(output);
        let (writer, guard) = open_output(output, rotation_limits)?;
        guards.push(guard);
        let layer = output_layer(writer, &encoder);
        layers.push(toggle_if_console(output, layer, &console_enabled));
    }

    // A path already opened above receives the ERROR records anyway
    for output in &logger_config.error_output_paths {
        if opened.contains(&output.as_str()) {
            continue;
        }
        opened.push(output);
        let (writer, guard) = open_output(output, rotation_limits)?;
        guards.push(guard);
        let layer = Box::new(FilteredLayer::new(
            output_layer(writer, &encoder),
            |metadata: &Metadata<'_>| *metadata.level() == Level::ERROR,
        ));
        layers.push(toggle_if_console(output, layer, &console_enabled));
    }

    let subscriber = tracing_subscriber::registry().with(reloadable_env_filter).with(layers);

    let handle = LoggerHandle {
        config: Arc::new(ArcSwap::from_pointee(logger_config.clone())),
        reload_handle,
        console_enabled,
    };

    Ok((subscriber, LogWorkerGuard { guards, handle }))
}

fn output_layer(writer: NonBlocking, encoder: &EventEncoder) -> OutputLayer {
    Box::new(fmt::Layer::new().event_format(encoder.clone()).with_writer(writer))
}

fn toggle_if_console(
    output: &str,
    layer: OutputLayer,
    console_enabled: &Arc<AtomicBool>,
) -> OutputLayer {
    if is_console(output) {
        Box::new(ToggleFilter::new(layer, console_enabled.clone()))
    } else {
        layer
    }
}

fn is_console(output: &str) -> bool {
    output == STDOUT_OUTPUT || output == STDERR_OUTPUT
}

fn open_output(
    output: &str,
    rotation_limits: Option<RotationLimits>,
) -> Result<(NonBlocking, WorkerGuard), LoggerError> {
    Ok(match output {
        STDOUT_OUTPUT => tracing_appender::non_blocking(std::io::stdout()),
        STDERR_OUTPUT => tracing_appender::non_blocking(std::io::stderr()),
        file_output => match rotation_limits {
            Some(limits) => {
                let file_appender = RotatingFileWriter::new(file_output, limits)?;
                tracing_appender::non_blocking(file_appender)
            }
            None => {
                config::create_parent_dir(Path::new(file_output))?;
                let (dir, filename) = path_to_dir_and_filename(file_output)?;
                let file_appender = RollingFileAppender::builder()
                    .rotation(Rotation::NEVER)
                    .filename_prefix(filename)
                    .build(&dir)
                    .map_err(|err| LoggerError::OutputError {
                        path: file_output.to_owned(),
                        message: format!("{}", err),
                    })?;
                tracing_appender::non_blocking(file_appender)
            }
        },
    })
}

fn parse_env_filter(env_filter_str: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::from_str(env_filter_str).map_err(|err| LoggerError::LoggerConfigurationError {
        message: format!("Cannot parse the logger level: [{}]. err: {:?}", env_filter_str, err),
    })
}

fn path_to_dir_and_filename(full_path: &str) -> Result<(String, String), LoggerError> {
    let full_path = full_path.replace(r#"\"#, "/");
    let (dir, filename) = match full_path.rfind('/') {
        Some(last_separator_index) => (
            full_path[0..last_separator_index + 1].to_owned(),
            full_path[last_separator_index + 1..full_path.len()].to_owned(),
        ),
        None => ("./".to_owned(), full_path.clone()),
    };
    if filename.is_empty() {
        return Err(LoggerError::LoggerConfigurationError {
            message: format!("Output file format [{}] is wrong", full_path),
        });
    }
    Ok((dir, filename))
}

fn set_global_logger<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    tracing_log::LogTracer::init().map_err(|err| LoggerError::LoggerConfigurationError {
        message: format!("Cannot start the logger LogTracer. err: {:?}", err),
    })?;
    set_global_default(subscriber).map_err(|err| LoggerError::LoggerConfigurationError {
        message: format!("Cannot start the logger. err: {:?}", err),
    })
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::config::RotationConfig;

    #[test]
    fn should_split_the_file_path() {
        assert_eq!(
            ("/tmp/hello/".to_owned(), "filename".to_owned()),
            path_to_dir_and_filename("/tmp/hello/filename").unwrap()
        );
        assert_eq!(
            ("/".to_owned(), "log_output.log".to_owned()),
            path_to_dir_and_filename("/log_output.log").unwrap()
        );
        assert_eq!(
            ("/tmp/".to_owned(), "log_output.log".to_owned()),
            path_to_dir_and_filename("/tmp/log_output.log").unwrap()
        );
        assert_eq!(
            ("//tmp///".to_owned(), "log_output.log".to_owned()),
            path_to_dir_and_filename("//tmp///log_output.log").unwrap()
        );
        assert_eq!(
            ("./".to_owned(), "log_output.log".to_owned()),
            path_to_dir_and_filename("log_output.log").unwrap()
        );
    }

    #[test]
    fn split_the_file_path_should_fail_if_the_filename_is_not_present() {
        assert!(path_to_dir_and_filename("/tmp/").is_err());
    }

    #[test]
    fn should_recognize_the_console_outputs() {
        assert!(is_console("stdout"));
        assert!(is_console("stderr"));
        assert!(!is_console("log/stdout"));
    }

    #[test]
    fn build_logger_should_fail_with_a_wrong_level() {
        let config = LoggerConfig {
            level: "info,my_crate=not_a_level".to_owned(),
            output_paths: vec!["stdout".to_owned()],
            ..Default::default()
        };
        assert!(matches!(build_logger(&config), Err(LoggerError::LoggerConfigurationError { .. })));
    }

    #[test]
    fn build_logger_should_create_the_output_folders() {
        // Arrange
        let tempdir = tempfile::tempdir().unwrap();
        let rotated = tempdir.path().join("rotated/app.log");
        let plain = tempdir.path().join("plain/app.log");
        let config = LoggerConfig {
            output_paths: vec![rotated.to_str().unwrap().to_owned()],
            error_output_paths: vec![],
            ..Default::default()
        };
        let plain_config = LoggerConfig {
            output_paths: vec![plain.to_str().unwrap().to_owned()],
            error_output_paths: vec![],
            rotation: None,
            ..Default::default()
        };

        // Act
        let _logger = build_logger(&config).unwrap();
        let _plain_logger = build_logger(&plain_config).unwrap();

        // Assert
        assert!(rotated.exists());
        assert!(plain.parent().unwrap().exists());
    }

    #[test]
    fn build_logger_should_write_the_records_to_the_files() {
        // Arrange
        let tempdir = tempfile::tempdir().unwrap();
        let output = tempdir.path().join("app.log");
        let error_output = tempdir.path().join("error.log");
        let config = LoggerConfig {
            level: "info".to_owned(),
            output_paths: vec![output.to_str().unwrap().to_owned()],
            error_output_paths: vec![error_output.to_str().unwrap().to_owned()],
            ..Default::default()
        };

        // Act
        let (subscriber, guard) = build_logger(&config).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("this is debug");
            tracing::info!("this is info");
            tracing::error!("this is error");
        });
        drop(guard);

        // Assert
        let content = std::fs::read_to_string(&output).unwrap();
        assert!(!content.contains("this is debug"));
        assert!(content.contains("this is info"));
        assert!(content.contains("this is error"));

        let error_content = std::fs::read_to_string(&error_output).unwrap();
        assert!(!error_content.contains("this is info"));
        assert!(error_content.contains("this is error"));
    }

    #[test]
    fn build_logger_should_open_each_output_only_once() {
        // Arrange
        let tempdir = tempfile::tempdir().unwrap();
        let output = tempdir.path().join("app.log").to_str().unwrap().to_owned();
        let config = LoggerConfig {
            level: "info".to_owned(),
            output_paths: vec![output.clone(), output.clone()],
            error_output_paths: vec![output.clone(), output.clone()],
            rotation: Some(RotationConfig { max_size_mb: 1, max_backups: 2, max_age_days: 0 }),
            ..Default::default()
        };

        // Act
        let (subscriber, guard) = build_logger(&config).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("single info");
            tracing::error!("single error");
        });
        drop(guard);

        // Assert
        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(1, content.matches("single info").count());
        assert_eq!(1, content.matches("single error").count());
    }

    #[test]
    fn build_logger_should_fail_with_too_big_rotation_values() {
        let too_big_size: LoggerConfig = serde_json::from_str(
            r#"{ "output_paths": ["stdout"], "rotation": { "max_size_mb": 9223372036854775807 } }"#,
        )
        .unwrap();
        let too_old: LoggerConfig = serde_json::from_str(
            r#"{ "output_paths": ["stdout"], "rotation": { "max_age_days": 1000000000000000 } }"#,
        )
        .unwrap();

        assert!(matches!(
            build_logger(&too_big_size),
            Err(LoggerError::LoggerConfigurationError { .. })
        ));
        assert!(matches!(
            build_logger(&too_old),
            Err(LoggerError::LoggerConfigurationError { .. })
        ));
    }

    #[test]
    fn handle_should_reload_the_level_and_update_the_config() {
        // Arrange
        let config = LoggerConfig {
            level: "info".to_owned(),
            output_paths: vec!["stdout".to_owned()],
            error_output_paths: vec![],
            ..Default::default()
        };
        let (_subscriber, guard) = build_logger(&config).unwrap();

        // Act
        guard.reload("debug,my_crate=trace").unwrap();

        // Assert
        assert_eq!("debug,my_crate=trace", guard.handle().config().level);
        assert!(guard.reload("info,my_crate=not_a_level").is_err());
        assert_eq!("debug,my_crate=trace", guard.handle().config().level);
    }

    #[test]
    fn handle_should_toggle_the_console_output() {
        let (_subscriber, guard) = build_logger(&LoggerConfig {
            output_paths: vec!["stdout".to_owned()],
            ..Default::default()
        })
        .unwrap();
        let handle = guard.handle().clone();

        assert!(handle.is_console_output_enabled());
        handle.set_console_output(false);
        assert!(!guard.handle().is_console_output_enabled());
    }
}
