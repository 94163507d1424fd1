// External crates
use config::{Config, File, FileFormat, Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::instrument;

/// Section of the key-file holding the reporter's settings.
pub const LOGGER_SECTION: &str = "logger";

pub const DEFAULT_ADMIN_SERVER_HOST: &str = "localhost";
pub const DEFAULT_ADMIN_SERVER_PORT: u16 = 8181;

/// Resolved reporter settings.
///
/// Every field has a default, so a `Settings` value is always complete. It is
/// built once during startup and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub admin_server_host: String,
    pub admin_server_port: u16,
    pub debug: bool,
    pub run_mode: RunMode,
    /// JSON-lines changeset source, `-` is stdin. `None` submits the sample changeset.
    pub changes: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_server_host: DEFAULT_ADMIN_SERVER_HOST.to_string(),
            admin_server_port: DEFAULT_ADMIN_SERVER_PORT,
            debug: false,
            run_mode: RunMode::default(),
            changes: None,
        }
    }
}

/// How long the driver keeps the process alive after dispatching changesets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Keep running until SIGINT/SIGTERM.
    #[default]
    Forever,
    /// Exit once every dispatched submission has completed.
    UntilIdle,
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "forever" => Ok(Self::Forever),
            "until-idle" => Ok(Self::UntilIdle),
            other => Err(ConfigError::InvalidRunMode(other.to_string())),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => f.write_str("forever"),
            Self::UntilIdle => f.write_str("until-idle"),
        }
    }
}

/// Structural configuration failures. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no value was provided for {flag}")]
    MissingArgument { flag: String },
    #[error("{} does not exist", .path.display())]
    FileNotFound { path: PathBuf },
    #[error("{} is not a regular file", .path.display())]
    NotARegularFile { path: PathBuf },
    #[error("could not parse configuration file {}", .path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
    #[error("{} does not have a [logger] section", .path.display())]
    MissingSection { path: PathBuf },
    #[error("unknown run mode '{0}', expected 'forever' or 'until-idle'")]
    InvalidRunMode(String),
}

impl Settings {
    /// Overlay the `[logger]` section of a key-file on top of `self`.
    ///
    /// Keys that are absent or unreadable keep their current value; only a
    /// missing/irregular/unparseable file or a missing section is an error.
    #[instrument(
        name = "config_loader",
        level = "debug",
        skip_all,
        fields(configuration_file_path = %path.display())
    )]
    pub fn overlay_key_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("{} selected as configuration file", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(ConfigError::NotARegularFile {
                path: path.to_path_buf(),
            });
        }

        starts_with_group(path)?;

        let key_file = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .build()
            .map_err(|source| {
                tracing::debug!(error = %source, "Key-file parser rejected configuration file");
                ConfigError::ParseError {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        let section = key_file
            .get_table(LOGGER_SECTION)
            .map_err(|_| ConfigError::MissingSection {
                path: path.to_path_buf(),
            })?;

        if let Some(host) = read_key(&section, "admin_server_host", |v| v.into_string().ok()) {
            self.admin_server_host = host;
        }
        if let Some(port) = read_key(&section, "admin_server_port", parse_port) {
            self.admin_server_port = port;
        }
        if let Some(mode) = read_key(&section, "run_mode", |v| {
            v.into_string().ok().and_then(|s| s.parse().ok())
        }) {
            self.run_mode = mode;
        }

        tracing::debug!("Configuration file loaded");
        Ok(self)
    }
}

/// Key-files must open with a `[group]` header; only blank lines and `#`
/// comments may precede it.
fn starts_with_group(path: &Path) -> Result<(), ConfigError> {
    let parse_error = |source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    };

    let contents = std::fs::read_to_string(path)
        .map_err(|e| parse_error(config::ConfigError::Foreign(Box::new(e))))?;
    let first = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'));

    match first {
        Some(line) if !line.starts_with('[') => {
            tracing::debug!(line, "Key-file does not start with a group");
            Err(parse_error(config::ConfigError::Message(
                "key file does not start with a group".to_string(),
            )))
        }
        _ => Ok(()),
    }
}

/// Look up an optional key, logging (at debug) why it was skipped.
fn read_key<T>(
    section: &Map<String, Value>,
    key: &str,
    convert: impl FnOnce(Value) -> Option<T>,
) -> Option<T> {
    let Some(raw) = section.get(key) else {
        tracing::debug!(key, "Key not present in [logger], keeping previous value");
        return None;
    };
    let shown = raw.to_string();
    let value = convert(raw.clone());
    if value.is_none() {
        tracing::debug!(key, value = %shown, "Key could not be read, keeping previous value");
    }
    value
}

fn parse_port(value: Value) -> Option<u16> {
    let port = value.into_int().ok()?;
    u16::try_from(port).ok().filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn key_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write key-file");
        file
    }

    #[test]
    fn defaults_are_fully_populated() {
        let settings = Settings::default();
        assert_eq!(settings.admin_server_host, "localhost");
        assert_eq!(settings.admin_server_port, 8181);
        assert!(!settings.debug);
        assert_eq!(settings.run_mode, RunMode::Forever);
        assert!(settings.changes.is_none());
    }

    #[test]
    fn host_override_keeps_default_port() {
        let file = key_file("[logger]\nadmin_server_host=foo.example.com\n");
        let settings = Settings::default()
            .overlay_key_file(file.path())
            .expect("valid key-file");
        assert_eq!(settings.admin_server_host, "foo.example.com");
        assert_eq!(settings.admin_server_port, DEFAULT_ADMIN_SERVER_PORT);
    }

    #[test]
    fn all_keys_override() {
        let file = key_file(
            "# reporter settings\n[logger]\nadmin_server_host = admin.internal\nadmin_server_port = 9090\nrun_mode = until-idle\n",
        );
        let settings = Settings::default()
            .overlay_key_file(file.path())
            .expect("valid key-file");
        assert_eq!(settings.admin_server_host, "admin.internal");
        assert_eq!(settings.admin_server_port, 9090);
        assert_eq!(settings.run_mode, RunMode::UntilIdle);
    }

    #[test]
    fn unreadable_port_keeps_previous_value() {
        let file = key_file("[logger]\nadmin_server_port=not-a-port\n");
        let settings = Settings::default()
            .overlay_key_file(file.path())
            .expect("unreadable keys are not errors");
        assert_eq!(settings.admin_server_port, DEFAULT_ADMIN_SERVER_PORT);

        let file = key_file("[logger]\nadmin_server_port=70000\n");
        let settings = Settings::default()
            .overlay_key_file(file.path())
            .expect("out of range port is not an error");
        assert_eq!(settings.admin_server_port, DEFAULT_ADMIN_SERVER_PORT);
    }

    #[test]
    fn missing_logger_section_is_rejected() {
        let file = key_file("[other]\nadmin_server_host=foo.example.com\n");
        let err = Settings::default()
            .overlay_key_file(file.path())
            .expect_err("section is required");
        assert!(matches!(err, ConfigError::MissingSection { .. }));
    }

    #[test]
    fn nonexistent_file_is_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let err = Settings::default()
            .overlay_key_file(&dir.path().join("missing.conf"))
            .expect_err("file does not exist");
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_regular_file() {
        let dir = TempDir::new().expect("temp dir");
        let err = Settings::default()
            .overlay_key_file(dir.path())
            .expect_err("directories are rejected");
        assert!(matches!(err, ConfigError::NotARegularFile { .. }));
    }

    #[test]
    fn malformed_key_file_is_a_parse_error() {
        let file = key_file("[logger\nadmin_server_host=foo.example.com\n");
        let err = Settings::default()
            .overlay_key_file(file.path())
            .expect_err("unterminated section header");
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn keys_before_first_group_are_a_parse_error() {
        let file = key_file("stray=1\n[logger]\nadmin_server_host=x.example\n");
        let err = Settings::default()
            .overlay_key_file(file.path())
            .expect_err("key outside any group");
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let file = key_file("\n# leading comment\n[logger]\nadmin_server_host=x.example\n");
        let settings = Settings::default()
            .overlay_key_file(file.path())
            .expect("comments may precede the first group");
        assert_eq!(settings.admin_server_host, "x.example");
    }

    #[test]
    fn run_mode_round_trips_through_text() {
        assert_eq!("until-idle".parse::<RunMode>().ok(), Some(RunMode::UntilIdle));
        assert_eq!(RunMode::Forever.to_string(), "forever");
        assert!(matches!(
            "sometimes".parse::<RunMode>(),
            Err(ConfigError::InvalidRunMode(mode)) if mode == "sometimes"
        ));
    }
}
