//! Dispatch settings loader.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/packages/conf/dispatch.yaml`
//! - User overrides:  `<PRJ_CONFIG_HOME>/omni-dev-fusion/dispatch.yaml`
//! - An explicit file passed on the command line, if any
//! - `OMNI_DISPATCH_*` environment variables
//!
//! Later layers win. Missing files contribute nothing; unreadable or
//! unparsable files are logged and skipped.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::DispatcherConfig;
use crate::error::ConfigError;
use crate::process::ProcessWorkerConfig;

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "packages/conf/dispatch.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "omni-dev-fusion/dispatch.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";

const ENV_CONCURRENCY: &str = "OMNI_DISPATCH_CONCURRENCY";
const ENV_MAX_IDLE_MS: &str = "OMNI_DISPATCH_MAX_IDLE_MS";
const ENV_MIN_IDLE_COUNT: &str = "OMNI_DISPATCH_MIN_IDLE_COUNT";
const ENV_EVICTION_INTERVAL_MS: &str = "OMNI_DISPATCH_EVICTION_INTERVAL_MS";
const ENV_WORKER_PROGRAM: &str = "OMNI_DISPATCH_WORKER_PROGRAM";

/// Layered dispatch settings; unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Concurrency and worker pool policy.
    #[serde(default)]
    pub pool: PoolSettings,
    /// How worker processes are launched.
    #[serde(default)]
    pub worker: WorkerSettings,
}

/// `pool:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Requests holding a worker at once, per job name.
    pub concurrency: Option<usize>,
    /// Idle lifetime of a pooled worker.
    pub max_idle_ms: Option<u64>,
    /// Idle workers kept per job name regardless of age.
    pub min_idle_count: Option<usize>,
    /// Eviction sweep period.
    pub eviction_interval_ms: Option<u64>,
    /// Lifecycle event bus capacity.
    pub event_capacity: Option<usize>,
}

/// `worker:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Interpreter the job file is run with.
    pub program: Option<String>,
    /// Interpreter arguments placed before the job path.
    pub args: Option<Vec<String>>,
}

impl DispatchSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            pool: self.pool.merge(overlay.pool),
            worker: self.worker.merge(overlay.worker),
        }
    }

    /// Apply `OMNI_DISPATCH_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEnv`] when a numeric variable does not parse.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEnv`] when a numeric variable does not parse.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = parse_env(ENV_CONCURRENCY, read(ENV_CONCURRENCY))? {
            self.pool.concurrency = Some(value);
        }
        if let Some(value) = parse_env(ENV_MAX_IDLE_MS, read(ENV_MAX_IDLE_MS))? {
            self.pool.max_idle_ms = Some(value);
        }
        if let Some(value) = parse_env(ENV_MIN_IDLE_COUNT, read(ENV_MIN_IDLE_COUNT))? {
            self.pool.min_idle_count = Some(value);
        }
        if let Some(value) = parse_env(ENV_EVICTION_INTERVAL_MS, read(ENV_EVICTION_INTERVAL_MS))? {
            self.pool.eviction_interval_ms = Some(value);
        }
        if let Some(program) = read(ENV_WORKER_PROGRAM) {
            self.worker.program = Some(program);
        }
        Ok(self)
    }

    /// Validated dispatcher configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the merged values are invalid.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        let defaults = DispatcherConfig::default();
        let config = DispatcherConfig {
            concurrency: self.pool.concurrency.unwrap_or(defaults.concurrency),
            max_idle_millis: self.pool.max_idle_ms.unwrap_or(defaults.max_idle_millis),
            min_idle_count: self.pool.min_idle_count.unwrap_or(defaults.min_idle_count),
            eviction_interval_millis: self.pool.eviction_interval_ms,
            event_capacity: self.pool.event_capacity.unwrap_or(defaults.event_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    /// Process launch configuration.
    #[must_use]
    pub fn process_config(&self) -> ProcessWorkerConfig {
        ProcessWorkerConfig {
            program: self.worker.program.clone(),
            program_args: self.worker.args.clone().unwrap_or_default(),
        }
    }
}

impl PoolSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            concurrency: overlay.concurrency.or(self.concurrency),
            max_idle_ms: overlay.max_idle_ms.or(self.max_idle_ms),
            min_idle_count: overlay.min_idle_count.or(self.min_idle_count),
            eviction_interval_ms: overlay.eviction_interval_ms.or(self.eviction_interval_ms),
            event_capacity: overlay.event_capacity.or(self.event_capacity),
        }
    }
}

impl WorkerSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            program: overlay.program.or(self.program),
            args: overlay.args.or(self.args),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value.parse::<T>().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value,
        })
    })
    .transpose()
}

/// Load system, user and optional explicit settings, then environment overrides.
///
/// # Errors
///
/// [`ConfigError::InvalidEnv`] when an environment override does not parse.
pub fn load_settings(explicit: Option<&Path>) -> Result<DispatchSettings, ConfigError> {
    let (system_path, user_path) = settings_paths();
    let mut settings = load_settings_from_paths(&system_path, &user_path);
    if let Some(path) = explicit {
        settings = settings.merge(load_one(path));
    }
    settings.apply_env()
}

/// Default system and user settings paths.
#[must_use]
pub fn settings_paths() -> (PathBuf, PathBuf) {
    let root = project_root();
    let system_path = root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH);
    let user_path = resolve_config_home(&root).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH);
    (system_path, user_path)
}

/// Merge two settings files, `user` over `system`. No environment overrides.
#[must_use]
pub fn load_settings_from_paths(system: &Path, user: &Path) -> DispatchSettings {
    load_one(system).merge(load_one(user))
}

fn load_one(path: &Path) -> DispatchSettings {
    if !path.exists() {
        return DispatchSettings::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to read dispatch settings file; ignoring"
            );
            return DispatchSettings::default();
        }
    };
    match serde_yaml::from_str::<DispatchSettings>(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse dispatch settings yaml; ignoring file"
            );
            DispatchSettings::default()
        }
    }
}

fn project_root() -> PathBuf {
    std::env::var("PRJ_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn resolve_config_home(project_root: &Path) -> PathBuf {
    let configured = std::env::var("PRJ_CONFIG_HOME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_HOME_RELATIVE_PATH), PathBuf::from);
    if configured.is_absolute() {
        configured
    } else {
        project_root.join(configured)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write settings");
        path
    }

    #[test]
    fn user_settings_override_system_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let system = write(
            dir.path(),
            "system.yaml",
            "pool:\n  concurrency: 2\n  max_idle_ms: 5000\nworker:\n  program: node\n",
        );
        let user = write(dir.path(), "user.yaml", "pool:\n  concurrency: 8\n");

        let settings = load_settings_from_paths(&system, &user);
        assert_eq!(settings.pool.concurrency, Some(8));
        assert_eq!(settings.pool.max_idle_ms, Some(5000));
        assert_eq!(settings.worker.program.as_deref(), Some("node"));
    }

    #[test]
    fn missing_and_broken_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = write(dir.path(), "broken.yaml", "pool: [not, a, map\n");
        let missing = dir.path().join("missing.yaml");

        let settings = load_settings_from_paths(&broken, &missing);
        assert_eq!(settings, DispatchSettings::default());
        let config = settings.dispatcher_config().expect("defaults are valid");
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OMNI_DISPATCH_CONCURRENCY", "3"),
            ("OMNI_DISPATCH_MIN_IDLE_COUNT", " 1 "),
            ("OMNI_DISPATCH_WORKER_PROGRAM", "python3"),
            ("OMNI_DISPATCH_MAX_IDLE_MS", ""),
        ]);
        let settings = DispatchSettings {
            pool: PoolSettings {
                concurrency: Some(10),
                max_idle_ms: Some(2000),
                ..PoolSettings::default()
            },
            ..DispatchSettings::default()
        }
        .apply_env_from(|name| env.get(name).map(ToString::to_string))
        .expect("valid env");

        assert_eq!(settings.pool.concurrency, Some(3));
        assert_eq!(settings.pool.min_idle_count, Some(1));
        assert_eq!(settings.pool.max_idle_ms, Some(2000));
        assert_eq!(settings.process_config().program.as_deref(), Some("python3"));
    }

    #[test]
    fn unparsable_env_is_rejected() {
        let err = DispatchSettings::default()
            .apply_env_from(|name| (name == "OMNI_DISPATCH_CONCURRENCY").then(|| "many".to_string()))
            .expect_err("invalid env");
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                name: "OMNI_DISPATCH_CONCURRENCY".to_string(),
                value: "many".to_string(),
            }
        );
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let settings = DispatchSettings {
            pool: PoolSettings {
                concurrency: Some(0),
                ..PoolSettings::default()
            },
            ..DispatchSettings::default()
        };
        assert_eq!(settings.dispatcher_config(), Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn oversized_env_concurrency_fails_validation() {
        let huge = usize::MAX.to_string();
        let settings = DispatchSettings::default()
            .apply_env_from(|name| (name == "OMNI_DISPATCH_CONCURRENCY").then(|| huge.clone()))
            .expect("parses as usize");
        assert!(matches!(
            settings.dispatcher_config(),
            Err(ConfigError::ConcurrencyTooLarge { .. })
        ));
    }

    #[test]
    fn process_config_carries_interpreter_args() {
        let settings = DispatchSettings {
            worker: WorkerSettings {
                program: Some("node".to_string()),
                args: Some(vec!["--max-old-space-size=512".to_string()]),
            },
            ..DispatchSettings::default()
        };
        let process = settings.process_config();
        assert_eq!(process.program.as_deref(), Some("node"));
        assert_eq!(process.program_args, ["--max-old-space-size=512"]);
    }
}
