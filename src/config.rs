//! Configuration loading and defaults for notebook-exec.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::command_safety::Denylist;
use crate::namespace::{AutoImport, DEFAULT_SEED_MODULES, is_identifier};
use crate::session::SessionSettings;
use crate::utils::{MAX_OUTPUT_SIZE, expand_path, find_dot_venv_python, find_program_on_path};

// === Constants ===

const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;

#[cfg(windows)]
const PYTHON_PROGRAMS: &[&str] = &["python", "python3"];
#[cfg(not(windows))]
const PYTHON_PROGRAMS: &[&str] = &["python3", "python"];

// === Types ===

/// Resolved configuration, including defaults and environment overrides.
///
/// Timeouts are in seconds; `0` disables a timeout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Interpreter hosting the namespace and receiving `pip install`s.
    pub python: Option<String>,
    pub working_dir: Option<String>,

    // === Timeouts ===
    pub shell_timeout: Option<u64>,
    pub exec_timeout: Option<u64>,
    pub install_timeout: Option<u64>,

    pub max_output_chars: Option<usize>,
    /// Names refused in addition to the built-in denylist.
    pub denylist_extra: Option<Vec<String>>,
    /// Replaces the built-in auto-import table when set.
    pub auto_imports: Option<Vec<AutoImport>>,
    pub seed_modules: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(flatten)]
    base: Config,
    profiles: Option<HashMap<String, Config>>,
}

// === Config Loading ===

impl Config {
    /// Load configuration from disk and merge with environment overrides.
    pub fn load(path: Option<PathBuf>, profile: Option<&str>) -> Result<Self> {
        let path = path.or_else(default_config_path);
        let mut config = match path.as_ref() {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let parsed: ConfigFile = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                apply_profile(parsed, profile)?
            }
            _ => {
                if let Some(name) = profile {
                    anyhow::bail!("Profile '{name}' not found. Available profiles: none");
                }
                Config::default()
            }
        };

        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would produce a broken session.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref python) = self.python
            && python.trim().is_empty()
        {
            anyhow::bail!("python cannot be empty string");
        }
        if self.max_output_chars == Some(0) {
            anyhow::bail!("max_output_chars must be greater than zero");
        }
        for entry in self.auto_imports.iter().flatten() {
            if !is_identifier(&entry.alias) {
                anyhow::bail!("Invalid auto-import alias: {:?}", entry.alias);
            }
            if entry.module.trim().is_empty() {
                anyhow::bail!("Auto-import '{}' has an empty module name", entry.alias);
            }
        }
        for module in self.seed_modules.iter().flatten() {
            if !module.split('.').all(is_identifier) {
                anyhow::bail!("Invalid seed module: {module:?}");
            }
        }
        Ok(())
    }

    /// Working directory for shell lines and the interpreter.
    pub fn working_dir(&self) -> Result<PathBuf> {
        match self.working_dir.as_deref() {
            Some(dir) => Ok(expand_path(dir)),
            None => std::env::current_dir().context("Failed to resolve current directory"),
        }
    }

    /// Interpreter to run: configured path, then a `.venv` above the working
    /// directory, then `python3`/`python` on `PATH`.
    #[must_use]
    pub fn python_program(&self, working_dir: &Path) -> PathBuf {
        if let Some(python) = self.python.as_deref() {
            return expand_path(python);
        }
        find_dot_venv_python(working_dir)
            .or_else(|| PYTHON_PROGRAMS.iter().find_map(|name| find_program_on_path(name)))
            .unwrap_or_else(|| PathBuf::from(PYTHON_PROGRAMS[0]))
    }

    #[must_use]
    pub fn shell_timeout(&self) -> Option<Duration> {
        seconds(self.shell_timeout)
    }

    #[must_use]
    pub fn exec_timeout(&self) -> Option<Duration> {
        seconds(self.exec_timeout)
    }

    #[must_use]
    pub fn install_timeout(&self) -> Option<Duration> {
        seconds(Some(
            self.install_timeout.unwrap_or(DEFAULT_INSTALL_TIMEOUT_SECS),
        ))
    }

    #[must_use]
    pub fn max_output_chars(&self) -> usize {
        self.max_output_chars.unwrap_or(MAX_OUTPUT_SIZE)
    }

    #[must_use]
    pub fn denylist(&self) -> Denylist {
        Denylist::with_extra(self.denylist_extra.clone().unwrap_or_default())
    }

    #[must_use]
    pub fn auto_imports(&self) -> Vec<AutoImport> {
        self.auto_imports.clone().unwrap_or_else(AutoImport::defaults)
    }

    #[must_use]
    pub fn seed_modules(&self) -> Vec<String> {
        self.seed_modules.clone().unwrap_or_else(|| {
            DEFAULT_SEED_MODULES
                .iter()
                .map(|m| (*m).to_string())
                .collect()
        })
    }

    /// Everything a [`crate::session::Session`] needs.
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let working_dir = self.working_dir()?;
        if !working_dir.is_dir() {
            anyhow::bail!("Working directory does not exist: {}", working_dir.display());
        }
        let python = self.python_program(&working_dir);

        Ok(SessionSettings {
            python,
            denylist: self.denylist(),
            shell_timeout: self.shell_timeout(),
            install_timeout: self.install_timeout(),
            exec_timeout: self.exec_timeout(),
            max_output: self.max_output_chars(),
            auto_imports: self.auto_imports(),
            seed_modules: self.seed_modules(),
            working_dir,
        })
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|secs| *secs > 0).map(Duration::from_secs)
}

// === Defaults ===

fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("NOTEBOOK_EXEC_CONFIG_PATH")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".notebook-exec").join("config.toml"))
}

// === Environment Overrides ===

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var("NOTEBOOK_EXEC_PYTHON") {
        config.python = Some(value);
    }
    if let Ok(value) = std::env::var("NOTEBOOK_EXEC_WORKDIR") {
        config.working_dir = Some(value);
    }
    if let Some(value) = env_number("NOTEBOOK_EXEC_SHELL_TIMEOUT") {
        config.shell_timeout = Some(value);
    }
    if let Some(value) = env_number("NOTEBOOK_EXEC_EXEC_TIMEOUT") {
        config.exec_timeout = Some(value);
    }
    if let Some(value) = env_number("NOTEBOOK_EXEC_INSTALL_TIMEOUT") {
        config.install_timeout = Some(value);
    }
    if let Ok(value) = std::env::var("NOTEBOOK_EXEC_MAX_OUTPUT")
        && let Ok(parsed) = value.trim().parse::<usize>()
    {
        config.max_output_chars = Some(parsed);
    }
    if let Ok(value) = std::env::var("NOTEBOOK_EXEC_DENYLIST") {
        config.denylist_extra = Some(
            value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        );
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn apply_profile(config: ConfigFile, profile: Option<&str>) -> Result<Config> {
    let Some(profile_name) = profile else {
        return Ok(config.base);
    };
    let profiles = config.profiles.as_ref();
    match profiles.and_then(|profiles| profiles.get(profile_name)) {
        Some(override_cfg) => Ok(merge_config(config.base, override_cfg.clone())),
        None => {
            let available = profiles
                .map(|profiles| {
                    let mut keys = profiles.keys().cloned().collect::<Vec<_>>();
                    keys.sort();
                    if keys.is_empty() {
                        "none".to_string()
                    } else {
                        keys.join(", ")
                    }
                })
                .unwrap_or_else(|| "none".to_string());
            anyhow::bail!(
                "Profile '{}' not found. Available profiles: {}",
                profile_name,
                available
            )
        }
    }
}

fn merge_config(base: Config, override_cfg: Config) -> Config {
    Config {
        python: override_cfg.python.or(base.python),
        working_dir: override_cfg.working_dir.or(base.working_dir),
        shell_timeout: override_cfg.shell_timeout.or(base.shell_timeout),
        exec_timeout: override_cfg.exec_timeout.or(base.exec_timeout),
        install_timeout: override_cfg.install_timeout.or(base.install_timeout),
        max_output_chars: override_cfg.max_output_chars.or(base.max_output_chars),
        denylist_extra: override_cfg.denylist_extra.or(base.denylist_extra),
        auto_imports: override_cfg.auto_imports.or(base.auto_imports),
        seed_modules: override_cfg.seed_modules.or(base.seed_modules),
    }
}
