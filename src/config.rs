//! Configuration for ferry jobs.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FERRY_WORK_DIR)
//! 2. Config file (.ferry/config.yaml)
//! 3. Defaults (~/.ferry/work, built-in retry/export/lock/drive settings)
//!
//! Config file discovery:
//! - Searches current directory and parents for .ferry/config.yaml
//! - Paths in config file are relative to the project root (the parent of .ferry/)
//!
//! The resolved configuration is returned by value; callers pass the pieces
//! they need into the components they construct.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{DriveSettings, ExportSettings};
use crate::core::{LockSettings, RetryPolicy};

/// Environment variable overriding the work directory
pub const WORK_DIR_ENV: &str = "FERRY_WORK_DIR";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub export: Option<ExportSettings>,
    #[serde(default)]
    pub lock: Option<LockSettings>,
    #[serde(default)]
    pub drive: Option<DriveSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Scratch directory for lock files and intermediate output
    pub work_dir: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to the work directory
    pub work_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub export: ExportSettings,
    pub lock: LockSettings,
    pub drive: DriveSettings,
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".ferry").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if let Some(ref retry) = config.retry {
        retry
            .validate()
            .with_context(|| format!("Invalid retry settings in {}", path.display()))?;
    }

    Ok(config)
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn default_work_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".ferry")
        .join("work"))
}

/// Load configuration, discovering the config file from the current directory
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd)
}

/// Load configuration, discovering the config file from `start`
pub fn load_config_from(start: &Path) -> Result<ResolvedConfig> {
    let config_file = find_config_file(start);
    let env_work_dir = std::env::var(WORK_DIR_ENV).ok().map(PathBuf::from);

    let Some(ref config_path) = config_file else {
        // No config file - use env vars or defaults
        let work_dir = match env_work_dir {
            Some(dir) => dir,
            None => default_work_dir()?,
        };
        return Ok(ResolvedConfig {
            work_dir,
            config_file: None,
            retry: RetryPolicy::default(),
            export: ExportSettings::default(),
            lock: LockSettings::default(),
            drive: DriveSettings::default(),
        });
    };

    let config = load_config_file(config_path)?;

    // Base directory is the parent of .ferry/ (i.e., grandparent of config.yaml)
    let base_dir = config_path
        .parent() // .ferry/
        .and_then(|p| p.parent()) // project root
        .unwrap_or(Path::new("."));

    let work_dir = if let Some(dir) = env_work_dir {
        dir
    } else if let Some(ref dir) = config.paths.work_dir {
        resolve_path(base_dir, dir)
    } else {
        default_work_dir()?
    };

    Ok(ResolvedConfig {
        work_dir,
        config_file: config_file.clone(),
        retry: config.retry.unwrap_or_default(),
        export: config.export.unwrap_or_default(),
        lock: config.lock.unwrap_or_default(),
        drive: config.drive.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{EncodingErrors, FileEncoding, Newline};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let ferry_dir = root.join(".ferry");
        std::fs::create_dir_all(&ferry_dir).unwrap();

        let config_path = ferry_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
version: "1.0"
paths:
  work_dir: ./work
retry:
  max_attempts: 5
export:
  encoding: shift_jis
  newline: windows
  errors: ignore
lock:
  timeout_seconds: 30
drive:
  date_suffix: true
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.work_dir, Some("./work".to_string()));

        let retry = config.retry.unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_ms, 2000);

        let export = config.export.unwrap();
        assert_eq!(export.encoding, FileEncoding::ShiftJis);
        assert_eq!(export.newline, Newline::Windows);
        assert_eq!(export.errors, EncodingErrors::Ignore);

        let lock = config.lock.unwrap();
        assert_eq!(lock.timeout_seconds, 30);
        assert_eq!(lock.poll_interval_ms, 5000);

        assert!(config.drive.unwrap().date_suffix);
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
version: "1.0"
retry:
  max_attempts: 0
"#,
        );

        assert!(load_config_file(&config_path).is_err());
    }

    #[test]
    fn test_discovery_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(temp.path(), "version: \"1.0\"");
        let nested = temp.path().join("jobs").join("daily");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(config_path));
    }

    #[test]
    fn test_sections_default_when_absent() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "version: \"1.0\"");

        let config = load_config_from(temp.path()).unwrap();
        assert!(config.config_file.is_some());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.export, ExportSettings::default());
        assert_eq!(config.lock, LockSettings::default());
        assert_eq!(config.drive, DriveSettings::default());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "../sibling"),
            PathBuf::from("/home/user/project/../sibling")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
