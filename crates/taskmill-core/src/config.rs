use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 15_000;
/// Poll intervals at or below this are rejected, never clamped.
pub const MIN_UPDATE_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_QUEUE_NAMESPACE: &str = "JobQueue";
pub const MAX_QUEUE_NAMESPACE_LEN: usize = 10;

/// Top-level config (taskmill.toml + TASKMILL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskmillConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a connection waits on a locked database before the call fails.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Job manager polling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Start the polling loop as soon as the worker boots.
    #[serde(default = "bool_true")]
    pub auto_start: bool,
    /// Claimant identity written to `locked_by`. Falls back to the host name.
    pub identity: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            auto_start: true,
            identity: None,
        }
    }
}

impl ManagerConfig {
    /// Reject a poll interval that would spin the store.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms <= MIN_UPDATE_INTERVAL_MS {
            return Err(CoreError::Config(format!(
                "manager.update_interval_ms must exceed {MIN_UPDATE_INTERVAL_MS} (got {})",
                self.update_interval_ms
            )));
        }
        Ok(())
    }

    /// The configured identity, or the machine name, or a random worker id.
    pub fn claimant_identity(&self) -> String {
        self.identity
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(machine_name)
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_namespace")]
    pub namespace: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            namespace: default_queue_namespace(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)
    }
}

/// A queue namespace is 1..=10 characters and not blank.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.trim().is_empty() || namespace.chars().count() > MAX_QUEUE_NAMESPACE_LEN {
        return Err(CoreError::Config(format!(
            "queue namespace must be 1-{MAX_QUEUE_NAMESPACE_LEN} non-blank characters (got {namespace:?})"
        )));
    }
    Ok(())
}

fn bool_true() -> bool {
    true
}
fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL_MS
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_queue_namespace() -> String {
    DEFAULT_QUEUE_NAMESPACE.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.taskmill/taskmill.db", home)
}

fn machine_name() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl TaskmillConfig {
    /// Load config from a TOML file with TASKMILL_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TASKMILL_MANAGER__UPDATE_INTERVAL_MS=30000`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TaskmillConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TASKMILL_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Validate every section. All problems are reported together, one per line.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.database.busy_timeout_ms == 0 {
            problems.push("database.busy_timeout_ms must be greater than zero".to_string());
        }
        for check in [self.manager.validate(), self.queue.validate()] {
            match check {
                Ok(()) => {}
                Err(CoreError::Config(message)) => problems.push(message),
                Err(other) => problems.push(other.to_string()),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Config(problems.join("\n")))
        }
    }

    /// Create the directory holding the database file.
    pub fn ensure_database_dir(&self) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.taskmill/taskmill.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = TaskmillConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager.update_interval_ms, 15_000);
        assert!(config.manager.auto_start);
        assert_eq!(config.queue.namespace, "JobQueue");
    }

    #[test]
    fn interval_at_floor_is_rejected() {
        let manager = ManagerConfig {
            update_interval_ms: MIN_UPDATE_INTERVAL_MS,
            ..ManagerConfig::default()
        };
        let err = manager.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let manager = ManagerConfig {
            update_interval_ms: MIN_UPDATE_INTERVAL_MS + 1,
            ..ManagerConfig::default()
        };
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = TaskmillConfig::default();
        config.database.busy_timeout_ms = 0;
        config.manager.update_interval_ms = 10;
        config.queue.namespace = "far-too-long-name".to_string();

        let message = match config.validate() {
            Err(CoreError::Config(message)) => message,
            other => panic!("expected a config error, got {other:?}"),
        };
        assert_eq!(message.lines().count(), 3);
        assert!(message.contains("busy_timeout_ms"));
        assert!(message.contains("update_interval_ms"));
        assert!(message.contains("namespace"));
    }

    #[test]
    fn namespace_bounds() {
        assert!(validate_namespace("JobQueue").is_ok());
        assert!(validate_namespace("0123456789").is_ok());
        assert!(validate_namespace("01234567890").is_err());
        assert!(validate_namespace("   ").is_err());
        assert!(validate_namespace("").is_err());
    }

    #[test]
    fn explicit_identity_wins() {
        let manager = ManagerConfig {
            identity: Some("  node-7 ".to_string()),
            ..ManagerConfig::default()
        };
        assert_eq!(manager.claimant_identity(), "node-7");
    }

    #[test]
    fn blank_identity_falls_back() {
        let manager = ManagerConfig {
            identity: Some("  ".to_string()),
            ..ManagerConfig::default()
        };
        assert!(!manager.claimant_identity().trim().is_empty());
    }

    #[test]
    fn load_reads_toml_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/taskmill-test.db"

[manager]
update_interval_ms = 30000
auto_start = false
identity = "box-1"

[queue]
namespace = "Mail"
"#
        )
        .unwrap();

        let config = TaskmillConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.path, "/tmp/taskmill-test.db");
        assert_eq!(config.database.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.manager.update_interval_ms, 30_000);
        assert!(!config.manager.auto_start);
        assert_eq!(config.manager.identity.as_deref(), Some("box-1"));
        assert_eq!(config.queue.namespace, "Mail");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = TaskmillConfig::load(path.to_str()).unwrap();
        assert_eq!(config.manager.update_interval_ms, DEFAULT_UPDATE_INTERVAL_MS);
    }
}
