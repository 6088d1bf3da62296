//! Configuration for the worker session manager
//!
//! All knobs are explicit on [`ManagerConfig`]; nothing reads process-wide
//! state after construction. [`ManagerConfig::from_env`] applies the
//! conventional `VAZAL_*` environment overrides for deployments that
//! configure the runtime location that way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default startup deadline for a freshly spawned worker (60 seconds)
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default idle threshold before a session is evicted (10 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval between idle-eviction sweeps (1 minute)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default deadline for classify requests (30 seconds)
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for plan requests (60 seconds)
pub const DEFAULT_PLAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for execute requests (10 minutes)
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default maximum length of a single wire line (1MB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Free-text readiness marker printed by legacy runtime builds that predate
/// the structured `ready` event
pub const DEFAULT_READY_SENTINEL: &str = "Vazal ready!";

/// Dangerous environment variables that should not be passed to the worker
///
/// These variables can affect how the worker process loads and executes
/// code, potentially creating security vulnerabilities.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "NODE_OPTIONS",
    "PERL5LIB",
    "RUBYLIB",
];

/// Configuration for a [`SessionManager`](crate::SessionManager)
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interpreter used to run the wrapper script
    pub program: PathBuf,
    /// Extra arguments placed before the wrapper script path
    pub program_args: Vec<String>,
    /// Path to the persistent wrapper script the worker runs
    pub wrapper: PathBuf,
    /// Agent runtime install directory; becomes the worker's working
    /// directory and is exported as `VAZAL_PATH`
    pub runtime_dir: PathBuf,
    /// Additional environment variables for the worker
    pub env: HashMap<String, String>,
    /// Deadline for a spawned worker to signal readiness
    pub startup_timeout: Duration,
    /// Idle threshold after which a session is evicted
    pub idle_timeout: Duration,
    /// Interval between idle-eviction sweeps
    pub sweep_interval: Duration,
    /// Deadline for classify requests
    pub classify_timeout: Duration,
    /// Deadline for plan requests
    pub plan_timeout: Duration,
    /// Deadline for execute requests
    pub execute_timeout: Duration,
    /// Maximum length of a single wire line before it is discarded as
    /// diagnostic noise
    pub max_line_length: usize,
    /// Free-text readiness marker accepted in addition to the structured
    /// `ready` event, for legacy runtime builds. `None` disables the shim.
    pub ready_sentinel: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| String::from("/root"));
        let runtime_dir = PathBuf::from(home).join("OpenManus");

        Self {
            program: PathBuf::from("python3"),
            program_args: Vec::new(),
            wrapper: runtime_dir.join("server/persistent_wrapper.py"),
            runtime_dir,
            env: HashMap::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            plan_timeout: DEFAULT_PLAN_TIMEOUT,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            ready_sentinel: Some(DEFAULT_READY_SENTINEL.to_string()),
        }
    }
}

impl ManagerConfig {
    /// Build a config from defaults plus `VAZAL_*` environment overrides
    ///
    /// Recognized variables:
    /// - `VAZAL_PATH` - runtime install directory
    /// - `VAZAL_WRAPPER` - wrapper script path (defaults to
    ///   `<runtime_dir>/server/persistent_wrapper.py`)
    /// - `VAZAL_PYTHON` - interpreter to use instead of `python3`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("VAZAL_PATH") {
            config.runtime_dir = PathBuf::from(&path);
            config.wrapper = config.runtime_dir.join("server/persistent_wrapper.py");
        }
        if let Ok(wrapper) = std::env::var("VAZAL_WRAPPER") {
            config.wrapper = PathBuf::from(wrapper);
        }
        if let Ok(python) = std::env::var("VAZAL_PYTHON") {
            config.program = PathBuf::from(python);
        }

        config
    }

    /// Deadline for the given request mode
    #[must_use]
    pub fn timeout_for(&self, mode: crate::protocol::Mode) -> Duration {
        match mode {
            crate::protocol::Mode::Classify => self.classify_timeout,
            crate::protocol::Mode::Plan => self.plan_timeout,
            crate::protocol::Mode::Execute => self.execute_timeout,
        }
    }
}
