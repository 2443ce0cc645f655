//! Daemon configuration.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <file>` on the command line
//! 2. `$INBOXD_CONFIG`
//! 3. `.inboxd/config.yaml`, searched in the current directory and parents
//! 4. Defaults rooted at `$INBOXD_HOME` or `~/.inboxd`
//!
//! `$INBOXD_HOME` also overrides `paths.root` from a config file.
//! Relative paths in a config file resolve against the directory holding
//! the file.
//!
//! There is no global config: the resolved [`DaemonConfig`] is passed to
//! whatever needs it.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::admission::{default_priority_rules, PriorityRuleConfig, DEFAULT_PRIORITY};
use paths::{Layout, SENTINEL_FILE};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "INBOXD_CONFIG";

/// Environment variable naming the root directory
pub const HOME_ENV: &str = "INBOXD_HOME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Cannot determine a home directory; set INBOXD_HOME")]
    NoHome,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// File schema
// ============================================================================

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub version: Option<String>,
    pub paths: PathsConfig,
    pub processor: ProcessorConfig,
    pub watcher: WatcherConfig,
    pub priority: PriorityConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for every directory not set explicitly
    pub root: Option<String>,
    pub inbox: Option<String>,
    pub processing: Option<String>,
    pub processed: Option<String>,
    pub failed: Option<String>,
    pub output: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub command: Option<Vec<String>>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: Option<WatcherBackend>,
    pub grace_period_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub ignore: Option<Vec<String>>,
    pub sentinel_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub default: Option<u8>,
    pub rules: Option<Vec<PriorityRuleConfig>>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// How new files are detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherBackend {
    /// OS notifications
    #[default]
    Native,

    /// Periodic directory listing
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorSettings {
    /// Argv prefix; input, `-o <output>` and `--model <model>` are appended
    pub command: Vec<String>,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            command: vec!["aster".to_string()],
            model: "llama3.2:1b".to_string(),
            timeout_seconds: 300,
            max_retries: 3,
        }
    }
}

impl ProcessorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherSettings {
    pub backend: WatcherBackend,
    pub grace_period_secs: u64,
    pub poll_interval_ms: u64,
    pub ignore: Vec<String>,
    pub sentinel_names: Vec<String>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            backend: WatcherBackend::Native,
            grace_period_secs: 2,
            poll_interval_ms: 1000,
            ignore: vec![
                "*.part".to_string(),
                "*.crdownload".to_string(),
                "*.download".to_string(),
                "*.tmp".to_string(),
                "~$*".to_string(),
            ],
            sentinel_names: vec![SENTINEL_FILE.to_string()],
        }
    }
}

impl WatcherSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrioritySettings {
    pub default: u8,
    pub rules: Vec<PriorityRuleConfig>,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            default: DEFAULT_PRIORITY,
            rules: default_priority_rules(),
        }
    }
}

/// Fully resolved configuration with absolute paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonConfig {
    pub paths: Layout,
    pub processor: ProcessorSettings,
    pub watcher: WatcherSettings,
    pub priority: PrioritySettings,

    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,

    /// How long an idle worker waits on the queue between shutdown checks
    #[serde(skip)]
    pub queue_poll: Duration,

    /// Bounded wait per task on stop
    #[serde(skip)]
    pub stop_timeout: Duration,
}

impl DaemonConfig {
    /// Built-in defaults rooted at `root`
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            paths: Layout::under(root.as_ref()),
            processor: ProcessorSettings::default(),
            watcher: WatcherSettings::default(),
            priority: PrioritySettings::default(),
            config_file: None,
            queue_poll: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Resolve from the process environment
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::resolve(&ConfigSources::from_env(explicit))
    }

    /// Resolve from explicit sources
    pub fn resolve(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let config_file = sources
            .explicit
            .clone()
            .or_else(|| sources.env_config.clone())
            .or_else(|| sources.cwd.as_deref().and_then(find_config_file));

        let config = match config_file {
            Some(path) => {
                let file = load_config_file(&path)?;
                Self::from_file(file, &path, sources.env_home.clone())?
            }
            None => {
                let root =
                    paths::default_root(sources.env_home.clone()).ok_or(ConfigError::NoHome)?;
                Self::with_root(root)
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed file over the defaults
    fn from_file(
        file: ConfigFile,
        config_path: &Path,
        env_home: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let base = config_path.parent().unwrap_or(Path::new("."));

        let root = match (env_home, &file.paths.root) {
            (Some(env), _) => env,
            (None, Some(root)) => resolve_path(base, root),
            (None, None) => paths::default_root(None).ok_or(ConfigError::NoHome)?,
        };

        let mut config = Self::with_root(&root);
        config.config_file = Some(config_path.to_path_buf());

        let p = &file.paths;
        let layout = &mut config.paths;
        for (slot, value) in [
            (&mut layout.inbox, &p.inbox),
            (&mut layout.processing, &p.processing),
            (&mut layout.processed, &p.processed),
            (&mut layout.failed, &p.failed),
            (&mut layout.output, &p.output),
            (&mut layout.state, &p.state),
        ] {
            if let Some(value) = value {
                *slot = resolve_path(base, value);
            }
        }

        let processor = &mut config.processor;
        if let Some(command) = file.processor.command {
            processor.command = command;
        }
        if let Some(model) = file.processor.model {
            processor.model = model;
        }
        if let Some(timeout) = file.processor.timeout_seconds {
            processor.timeout_seconds = timeout;
        }
        if let Some(retries) = file.processor.max_retries {
            processor.max_retries = retries;
        }

        let watcher = &mut config.watcher;
        if let Some(backend) = file.watcher.backend {
            watcher.backend = backend;
        }
        if let Some(grace) = file.watcher.grace_period_secs {
            watcher.grace_period_secs = grace;
        }
        if let Some(interval) = file.watcher.poll_interval_ms {
            watcher.poll_interval_ms = interval;
        }
        if let Some(ignore) = file.watcher.ignore {
            watcher.ignore = ignore;
        }
        if let Some(names) = file.watcher.sentinel_names {
            watcher.sentinel_names = names;
        }

        if let Some(default) = file.priority.default {
            config.priority.default = default;
        }
        if let Some(rules) = file.priority.rules {
            config.priority.rules = rules;
        }

        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.command.is_empty() {
            return Err(ConfigError::Invalid("processor.command is empty".into()));
        }
        if self.processor.max_retries == 0 {
            return Err(ConfigError::Invalid("processor.max_retries must be at least 1".into()));
        }
        if self.processor.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("processor.timeout_seconds must be positive".into()));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("watcher.poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Where configuration may come from. Split out so resolution can be
/// tested without touching the process environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub explicit: Option<PathBuf>,
    pub env_config: Option<PathBuf>,
    pub env_home: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
}

impl ConfigSources {
    pub fn from_env(explicit: Option<&Path>) -> Self {
        Self {
            explicit: explicit.map(Path::to_path_buf),
            env_config: std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            env_home: std::env::var_os(HOME_ENV).map(PathBuf::from),
            cwd: std::env::current_dir().ok(),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".inboxd").join("config.yaml");
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
fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve a path that may be relative to the config file's directory
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
