// Configuration loading and validation (config/lobbynotes.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::payload::DEFAULT_MAX_DEPTH;

/// Name of the config file inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "lobbynotes.toml";

/// Largest team panel the view supports.
pub const MAX_TEAM_SIZE: usize = 16;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub reader: ReaderConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub inspector: InspectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    pub team_size: usize,
}

impl Default for RosterConfig {
    fn default() -> Self {
        RosterConfig { team_size: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub dev_mode: bool,
    pub max_entries: usize,
    pub max_depth: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        InspectorConfig {
            dev_mode: false,
            max_entries: 500,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub trace: bool,
    pub debug: bool,
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub fn filter_directive(&self) -> &'static str {
        if self.trace {
            "lobbynotes=trace,lobbynotes_core=trace"
        } else if self.debug {
            "lobbynotes=debug,lobbynotes_core=debug"
        } else {
            "lobbynotes=info,lobbynotes_core=info"
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate `config/lobbynotes.toml` relative to `base_dir`, without
/// copying defaults.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let target = config_dir.join(file_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Load config relative to the working directory, copying defaults first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.reader.port == 0 {
        return Err(ConfigError::ValidationError {
            field: "reader.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.database.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    let team_size = config.roster.team_size;
    if !(1..=MAX_TEAM_SIZE).contains(&team_size) {
        return Err(ConfigError::ValidationError {
            field: "roster.team_size".into(),
            message: format!("must be between 1 and {MAX_TEAM_SIZE}, got {team_size}"),
        });
    }

    let inspector_fields: &[(&str, usize)] = &[
        ("inspector.max_entries", config.inspector.max_entries),
        ("inspector.max_depth", config.inspector.max_depth),
    ];
    for (name, val) in inspector_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Workspace root, where `defaults/` lives.
    fn project_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    /// Fresh temp dir holding `config/lobbynotes.toml` with `contents`.
    fn config_dir_with(name: &str, contents: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), contents).unwrap();
        tmp
    }

    fn expect_validation_error(contents: &str, name: &str, expected_field: &str) {
        let tmp = config_dir_with(name, contents);
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = std::env::temp_dir().join("lobbynotes_config_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            tmp.join("config").join(CONFIG_FILE),
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("defaults should be valid");
        assert_eq!(config.reader.port, 9002);
        assert_eq!(config.database.path, "lobbynotes.db");
        assert_eq!(config.roster.team_size, 5);
        assert!(!config.inspector.dev_mode);
        assert_eq!(config.inspector.max_depth, DEFAULT_MAX_DEPTH);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn optional_sections_take_defaults() {
        let tmp = config_dir_with(
            "lobbynotes_config_minimal",
            "[reader]\nport = 1234\n[database]\npath = \"x.db\"\n",
        );
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.roster.team_size, 5);
        assert_eq!(config.inspector.max_entries, 500);
        assert_eq!(
            config.logging.filter_directive(),
            "lobbynotes=info,lobbynotes_core=info"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn trace_flag_wins_over_debug() {
        let logging = LoggingConfig {
            trace: true,
            debug: true,
        };
        assert!(logging.filter_directive().contains("=trace"));
    }

    #[test]
    fn rejects_port_zero() {
        expect_validation_error(
            "[reader]\nport = 0\n[database]\npath = \"x.db\"\n",
            "lobbynotes_config_port_zero",
            "reader.port",
        );
    }

    #[test]
    fn rejects_empty_database_path() {
        expect_validation_error(
            "[reader]\nport = 1\n[database]\npath = \"  \"\n",
            "lobbynotes_config_empty_db",
            "database.path",
        );
    }

    #[test]
    fn rejects_oversized_team() {
        expect_validation_error(
            "[reader]\nport = 1\n[database]\npath = \"x.db\"\n[roster]\nteam_size = 17\n",
            "lobbynotes_config_big_team",
            "roster.team_size",
        );
    }

    #[test]
    fn rejects_zero_max_depth() {
        expect_validation_error(
            "[reader]\nport = 1\n[database]\npath = \"x.db\"\n[inspector]\nmax_depth = 0\n",
            "lobbynotes_config_zero_depth",
            "inspector.max_depth",
        );
    }

    #[test]
    fn file_not_found_when_config_missing() {
        let tmp = std::env::temp_dir().join("lobbynotes_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = config_dir_with("lobbynotes_config_invalid", "this is not valid [[[ toml");
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_and_skips_existing() {
        let tmp = std::env::temp_dir().join("lobbynotes_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            defaults_dir.join(CONFIG_FILE),
        )
        .unwrap();
        fs::write(defaults_dir.join("extra.toml.example"), "# template\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 1);
        assert!(tmp.join("config").join(CONFIG_FILE).exists());
        assert!(!tmp.join("config/extra.toml.example").exists());

        fs::write(tmp.join("config").join(CONFIG_FILE), "# custom\n").unwrap();
        assert!(ensure_config_files(&tmp).unwrap().is_empty());
        let content = fs::read_to_string(tmp.join("config").join(CONFIG_FILE)).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("lobbynotes_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match ensure_config_files(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
