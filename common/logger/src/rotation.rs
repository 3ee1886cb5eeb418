use crate::config::{create_parent_dir, RotationConfig};
use crate::LoggerError;
use chrono::{Duration, Local, NaiveDateTime};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// The thresholds applied by a [`RotatingFileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationLimits {
    /// `None` disables the size based rotation.
    pub max_bytes: Option<u64>,
    /// `None` keeps all the backups.
    pub max_backups: Option<usize>,
    /// `None` keeps the backups regardless of their age.
    pub max_age: Option<Duration>,
}

impl TryFrom<&RotationConfig> for RotationLimits {
    type Error = LoggerError;

    fn try_from(config: &RotationConfig) -> Result<Self, Self::Error> {
        let max_bytes = match non_zero(config.max_size_mb) {
            Some(mb) => Some(mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
                LoggerError::LoggerConfigurationError {
                    message: format!("The rotation max_size_mb [{}] is too big", mb),
                }
            })?),
            None => None,
        };

        let max_age = match non_zero(config.max_age_days) {
            Some(days) => Some(
                i64::try_from(days).ok().and_then(Duration::try_days).ok_or_else(|| {
                    LoggerError::LoggerConfigurationError {
                        message: format!("The rotation max_age_days [{}] is too big", days),
                    }
                })?,
            ),
            None => None,
        };

        Ok(Self {
            max_bytes,
            max_backups: if config.max_backups > 0 { Some(config.max_backups) } else { None },
            max_age,
        })
    }
}

fn non_zero(value: u64) -> Option<u64> {
    if value > 0 {
        Some(value)
    } else {
        None
    }
}

/// A file writer that moves the current file aside once it grows over the size limit.
///
/// Rotated files live next to the active one and are named
/// `<stem>-<YYYY-MM-DDTHH-MM-SS.mmm><.extension>`,
/// e.g. `log/log-2021-03-04T10-20-30.123.txt` for `log/log.txt`.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    limits: RotationLimits,
    file: File,
    size: u64,
    last_backup: Option<NaiveDateTime>,
}

impl RotatingFileWriter {
    pub fn new<P: AsRef<Path>>(path: P, limits: RotationLimits) -> Result<Self, LoggerError> {
        let path = path.as_ref().to_path_buf();
        create_parent_dir(&path)?;

        let file = open_append(&path).map_err(|err| output_error(&path, err))?;
        let size = file.metadata().map_err(|err| output_error(&path, err))?.len();

        let writer = Self { path, limits, file, size, last_backup: None };
        let _ = writer.remove_expired_backups();
        Ok(writer)
    }

    /// Returns the rotated files of this writer, newest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.list_backups()?.into_iter().map(|(_, path)| path).collect())
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        match self.limits.max_bytes {
            Some(max_bytes) => {
                self.size > 0 && self.size.saturating_add(incoming as u64) > max_bytes
            }
            None => false,
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let mut timestamp = Local::now().naive_local();
        if let Some(last) = self.last_backup {
            if timestamp <= last {
                timestamp = last + Duration::milliseconds(1);
            }
        }
        let mut backup_path = self.backup_path(&timestamp);
        while backup_path.exists() {
            timestamp += Duration::milliseconds(1);
            backup_path = self.backup_path(&timestamp);
        }

        std::fs::rename(&self.path, &backup_path)?;
        self.last_backup = Some(timestamp);
        self.file = open_append(&self.path)?;
        self.size = 0;

        // A backup that cannot be removed is retried at the next rotation
        let _ = self.remove_expired_backups();
        Ok(())
    }

    fn file_stem_and_extension(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = self
            .path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        (stem, extension)
    }

    fn backup_path(&self, timestamp: &NaiveDateTime) -> PathBuf {
        let (stem, extension) = self.file_stem_and_extension();
        let filename = format!("{}-{}{}", stem, timestamp.format(BACKUP_TIME_FORMAT), extension);
        self.path.with_file_name(filename)
    }

    fn parse_backup_timestamp(&self, filename: &str) -> Option<NaiveDateTime> {
        let (stem, extension) = self.file_stem_and_extension();
        let timestamp = filename.strip_prefix(&format!("{}-", stem))?.strip_suffix(&extension)?;
        NaiveDateTime::parse_from_str(timestamp, BACKUP_TIME_FORMAT).ok()
    }

    fn list_backups(&self) -> io::Result<Vec<(NaiveDateTime, PathBuf)>> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut backups = vec![];
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let filename = entry.file_name();
            if let Some(timestamp) = self.parse_backup_timestamp(&filename.to_string_lossy()) {
                backups.push((timestamp, entry.path()));
            }
        }
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(backups)
    }

    /// Deletes the backups over `max_backups` or older than `max_age`.
    /// A failed removal does not stop the others; the first error is returned.
    fn remove_expired_backups(&self) -> io::Result<()> {
        if self.limits.max_backups.is_none() && self.limits.max_age.is_none() {
            return Ok(());
        }

        let now = Local::now().naive_local();
        let mut result = Ok(());
        for (index, (timestamp, path)) in self.list_backups()?.into_iter().enumerate() {
            let too_many = self.limits.max_backups.map(|max| index >= max).unwrap_or(false);
            let too_old =
                self.limits.max_age.map(|max_age| now - timestamp > max_age).unwrap_or(false);
            if too_many || too_old {
                if let Err(err) = std::fs::remove_file(&path) {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        result
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn output_error(path: &Path, err: io::Error) -> LoggerError {
    LoggerError::OutputError { path: path.display().to_string(), message: format!("{}", err) }
}
