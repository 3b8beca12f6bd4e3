//! Configuration Type Definitions
//!
//! Core configuration structures for eavesdrop. These types are deserialised
//! from JSON, YAML or TOML configuration files and used to construct the
//! event manager, its watchers and the reload proxy.

use serde::{Deserialize, Serialize};

/// Name of the JSON configuration file written by `eavesdrop init`.
pub const JSON_CONFIG: &str = ".eavesdrop.json";

/// Name of the TOML configuration file written by `eavesdrop init`.
pub const TOML_CONFIG: &str = ".eavesdrop.toml";

/// Name of the YAML configuration file written by `eavesdrop init`.
pub const YAML_CONFIG: &str = ".eavesdrop.yaml";

/// Root configuration for the entire eavesdrop system.
///
/// # Example Structure
///
/// ```toml
/// root_dir = "."
///
/// [exclude]
/// dirs = ["node_modules", "tmp"]
///
/// [[watchers]]
/// name = "server"
/// file_types = [".go", ".html"]
/// tasks = ["go build -o ./tmp/main ."]
/// service = "./tmp/main"
/// trigger_refresh = true
///
/// [proxy]
/// enabled = true
/// app_port = 8000
/// proxy_port = 8001
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Project root directory. Every excluder path is relative to it.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,

    /// Create `<root_dir>/tmp` on start up
    #[serde(default)]
    pub tmp: bool,

    /// Remove `<root_dir>/tmp` on shutdown
    #[serde(default)]
    pub cleanup_tmp: bool,

    /// Global exclusions, applied before any watcher sees an event
    #[serde(default)]
    pub exclude: ExcluderConfig,

    /// Watcher definitions, started in the order given
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,

    /// Browser reload proxy
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for Config {
    /// The template written by `eavesdrop init`.
    ///
    /// Its single watcher has neither file types nor tasks, so the generated
    /// file has to be edited before it passes validation.
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            tmp: false,
            cleanup_tmp: false,
            exclude: ExcluderConfig {
                dirs: ["data", "dist", "node_modules", "tmp"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                files: Vec::new(),
                regex: vec![
                    // dotfiles on windows or unix at any depth
                    r"^\.?(\/?|\\?)(?:\w+(\/|\\))*(\.\w+)$".to_string(),
                    r"^.+\.sqlite$".to_string(),
                    r"^.+\.wal$".to_string(),
                    r"^.+\.shm$".to_string(),
                ],
            },
            watchers: vec![WatcherConfig {
                name: "watcher".to_string(),
                ..WatcherConfig::default()
            }],
            proxy: ProxyConfig::default(),
        }
    }
}

fn default_root_dir() -> String {
    ".".to_string()
}

/// Paths to leave alone.
///
/// `dirs` exclude the directory and everything beneath it, `files` exclude a
/// single path and `regex` patterns are matched against the root-relative
/// path.
#[derive(Clone, Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExcluderConfig {
    #[serde(default)]
    pub dirs: Vec<String>,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub regex: Vec<String>,
}

/// Configuration for a single watcher.
///
/// A watcher reacts to changes in the files it matches by killing its
/// service, running its tasks in order, restarting its service and,
/// optionally, refreshing connected browsers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Unique watcher name, used in log output
    pub name: String,

    /// File extensions this watcher reacts to, e.g. `.go`
    #[serde(default)]
    pub file_types: Vec<String>,

    /// Root-relative file paths this watcher reacts to
    #[serde(default)]
    pub file_names: Vec<String>,

    /// Exclusions local to this watcher
    #[serde(default)]
    pub exclude: ExcluderConfig,

    /// Shell commands run in order on every change
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Long-running shell command restarted on every change
    #[serde(default)]
    pub service: String,

    /// Run the tasks and service once on start up
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,

    /// Maximum run time of a single task, in milliseconds
    #[serde(default = "default_max_task_time")]
    pub max_task_time: u64,

    /// Grace period for the service to exit after SIGTERM, in milliseconds
    #[serde(default = "default_max_service_timeout")]
    pub max_service_timeout: u64,

    /// Quiet period before a burst of changes is acted upon, in milliseconds
    #[serde(default = "default_debounce_delay")]
    pub debounce_delay: u64,

    /// Refresh connected browsers after a successful run
    #[serde(default)]
    pub trigger_refresh: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            file_types: Vec::new(),
            file_names: Vec::new(),
            exclude: ExcluderConfig::default(),
            tasks: Vec::new(),
            service: String::new(),
            run_on_start: default_run_on_start(),
            max_task_time: default_max_task_time(),
            max_service_timeout: default_max_service_timeout(),
            debounce_delay: default_debounce_delay(),
            trigger_refresh: false,
        }
    }
}

const fn default_run_on_start() -> bool {
    true
}

const fn default_max_task_time() -> u64 {
    2000
}

const fn default_max_service_timeout() -> u64 {
    5000
}

const fn default_debounce_delay() -> u64 {
    300
}

/// Configuration for the browser reload proxy.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Port the proxied application listens on
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Port browsers connect to
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_port: default_app_port(),
            proxy_port: default_proxy_port(),
        }
    }
}

const fn default_app_port() -> u16 {
    8000
}

const fn default_proxy_port() -> u16 {
    8001
}
