#![forbid(unsafe_code)]

//! Per-thread configuration for reactive propagation.
//!
//! Cells never cross threads, so configuration is installed per thread.
//! Threads that never call [`ReactiveConfig::install`] use the defaults.

use std::cell::RefCell;
use std::env;

/// Environment variable overriding [`ReactiveConfig::max_recompute_depth`].
pub const ENV_MAX_DEPTH: &str = "FTUI_REACTIVE_MAX_DEPTH";
/// Environment variable overriding [`ReactiveConfig::log_evaluation_failures`].
pub const ENV_LOG_EVAL_FAILURES: &str = "FTUI_REACTIVE_LOG_EVAL_FAILURES";

thread_local! {
    static CURRENT: RefCell<ReactiveConfig> = RefCell::new(ReactiveConfig::default());
}

/// Configuration for reactive propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactiveConfig {
    /// Maximum number of times one derived cell's recompute may re-enter
    /// itself in one synchronous chain before the chain is treated as a
    /// dependency cycle.
    pub max_recompute_depth: usize,
    /// Emit a warning event when a fallible read function fails.
    pub log_evaluation_failures: bool,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_recompute_depth: 128,
            log_evaluation_failures: true,
        }
    }
}

impl ReactiveConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(ENV_MAX_DEPTH)
            && let Ok(n) = val.trim().parse()
        {
            config.max_recompute_depth = n;
        }
        if let Some(val) = lookup(ENV_LOG_EVAL_FAILURES) {
            let val = val.trim();
            config.log_evaluation_failures = val == "1" || val.eq_ignore_ascii_case("true");
        }
        config
    }

    /// Set the nested recompute limit.
    #[must_use]
    pub fn with_max_recompute_depth(mut self, depth: usize) -> Self {
        self.max_recompute_depth = depth;
        self
    }

    /// Toggle warnings for failed read functions.
    #[must_use]
    pub fn with_log_evaluation_failures(mut self, enabled: bool) -> Self {
        self.log_evaluation_failures = enabled;
        self
    }

    /// Install this configuration for the current thread, returning the
    /// previous one.
    pub fn install(self) -> ReactiveConfig {
        CURRENT.with(|current| current.replace(self))
    }

    /// The configuration in effect on the current thread.
    #[must_use]
    pub fn current() -> ReactiveConfig {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub(crate) fn max_depth() -> usize {
        CURRENT.with(|current| current.borrow().max_recompute_depth)
    }

    pub(crate) fn logs_evaluation_failures() -> bool {
        CURRENT.with(|current| current.borrow().log_evaluation_failures)
    }
}
