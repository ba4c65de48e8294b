//! Config file I/O and environment overrides.
//!
//! A config is assembled in three layers: schema defaults, then whatever the
//! TOML file provides, then the environment variables of record:
//!
//! - `REASONING_LOOP_TIMEOUT_MS` — hard wall-clock timeout per reasoning run
//! - `SCHEDULER_JOB_TIMEOUT_MS` — hard per-job timeout in the scheduler
//! - `COLONY_SCHEDULER_CHECK_INTERVAL_MS`, `COLONY_MAX_CONCURRENT_JOBS`,
//!   `COLONY_DB_PATH` — tuning knobs
//!
//! Saves go through a temp file in the same directory and a rename, so a
//! crash mid-write never leaves a truncated config behind.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::RuntimeConfig;

// ─── Path resolution ─────────────────────────────────────────────────────────

/// Default config file location: `~/.colony/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    match dirs::home_dir() {
        Some(home) => Ok(home.join(".colony").join("config.toml")),
        None => Err("could not determine home directory".to_string()),
    }
}

/// Where the runtime reads its config from: `COLONY_CONFIG` wins, then the
/// default location, then a bare `config.toml` in the working directory.
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = env::var("COLONY_CONFIG") {
        return PathBuf::from(path);
    }
    default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
}

// ─── Environment overrides ───────────────────────────────────────────────────

/// The environment layer, read once and applied on top of the file layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    pub loop_timeout_ms: Option<u64>,
    pub job_timeout_ms: Option<u64>,
    pub check_interval_ms: Option<u64>,
    pub max_concurrent_jobs: Option<usize>,
    pub db_path: Option<String>,
}

impl EnvOverrides {
    /// Snapshot the relevant process environment.
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            env::var(key).ok()?.parse().ok()
        }
        Self {
            loop_timeout_ms: parsed("REASONING_LOOP_TIMEOUT_MS"),
            job_timeout_ms: parsed("SCHEDULER_JOB_TIMEOUT_MS"),
            check_interval_ms: parsed("COLONY_SCHEDULER_CHECK_INTERVAL_MS"),
            max_concurrent_jobs: parsed("COLONY_MAX_CONCURRENT_JOBS"),
            db_path: env::var("COLONY_DB_PATH").ok(),
        }
    }

    /// Overlay the set values onto `config`.
    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(ms) = self.loop_timeout_ms {
            config.loop_.timeout_ms = ms;
        }
        if let Some(ms) = self.job_timeout_ms {
            config.scheduler.job_timeout_ms = ms;
        }
        if let Some(ms) = self.check_interval_ms {
            config.scheduler.check_interval_ms = ms;
        }
        if let Some(n) = self.max_concurrent_jobs {
            config.scheduler.max_concurrent_jobs = n;
        }
        if let Some(path) = &self.db_path {
            config.store.db_path = path.clone();
        }
    }
}

// ─── Load ────────────────────────────────────────────────────────────────────

/// Read `path`, layering file values over defaults and env values over both.
/// A missing file is not an error; a file that exists but fails to parse is.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, String> {
    let file_layer = match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    let mut config = match file_layer {
        Some(content) => toml::from_str::<RuntimeConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        None => RuntimeConfig::default(),
    };
    EnvOverrides::from_env().apply(&mut config);
    Ok(config)
}

/// Load from [`resolve_config_path`], swallowing errors into defaults.
pub fn load_default_config() -> RuntimeConfig {
    load_config(&resolve_config_path()).unwrap_or_default()
}

// ─── Save ────────────────────────────────────────────────────────────────────

/// Persist `config` as TOML.  Writes `<path>.tmp` first and renames it into
/// place; the directory is created if needed.
pub fn save_config(path: &Path, config: &RuntimeConfig) -> Result<(), String> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create config dir {parent:?}: {e}"))?;
        }
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, rendered).map_err(|e| format!("failed to write {tmp:?}: {e}"))?;
    fs::rename(&tmp, path).map_err(|e| format!("failed to move config into place: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("/definitely/not/here/config.toml")).unwrap();
        assert_eq!(cfg.loop_.timeout_ms, RuntimeConfig::default().loop_.timeout_ms);
    }

    #[test]
    fn parses_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[loop]\ntimeout_ms = 1000\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.loop_.timeout_ms, 1000);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn overrides_apply_only_set_fields() {
        let mut cfg = RuntimeConfig::default();
        let overrides = EnvOverrides {
            loop_timeout_ms: Some(1234),
            db_path: Some("/tmp/colony-test.db".to_string()),
            ..Default::default()
        };
        overrides.apply(&mut cfg);
        assert_eq!(cfg.loop_.timeout_ms, 1234);
        assert_eq!(cfg.store.db_path, "/tmp/colony-test.db");
        assert_eq!(
            cfg.scheduler.job_timeout_ms,
            RuntimeConfig::default().scheduler.job_timeout_ms,
            "unset overrides leave the file/default layer alone"
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = RuntimeConfig::default();
        cfg.scheduler.max_concurrent_jobs = 3;
        cfg.loop_.max_responds_per_run = 1;
        save_config(&path, &cfg).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.scheduler.max_concurrent_jobs, 3);
        assert_eq!(loaded.loop_.max_responds_per_run, 1);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &RuntimeConfig::default()).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut first = RuntimeConfig::default();
        first.scheduler.max_concurrent_jobs = 9;
        save_config(&path, &first).unwrap();

        let second = RuntimeConfig::default();
        save_config(&path, &second).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(
            loaded.scheduler.max_concurrent_jobs,
            RuntimeConfig::default().scheduler.max_concurrent_jobs
        );
    }
}
