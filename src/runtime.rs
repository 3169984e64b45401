//! Root entry point and runtime configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `credit` | available CPU parallelism |
//! | `thread_name_prefix` | `"ramify-worker"` |
//! | `thread_stack_size` | platform default |
//! | `root_drain_timeout` | none (unbounded) |

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::credit::{CreditHandle, CreditPool};
use crate::cx::{Cx, TreeShared};
use crate::error::{panic_message, BranchError};
use crate::reaper;
use crate::runner;

const CREDIT_ENV: &str = "RAMIFY_CREDIT";
const THREAD_NAME_ENV: &str = "RAMIFY_THREAD_NAME";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Fan-out credit of the root scope: how many extra workers the tree may
    /// keep live at once.
    pub credit: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread (platform default when unset).
    pub thread_stack_size: Option<usize>,
    /// Hard bound on the root drain. A worker that never completes then
    /// surfaces as an error instead of hanging the caller. The in-tree
    /// drains stay unbounded.
    pub root_drain_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            credit: thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            thread_name_prefix: "ramify-worker".to_owned(),
            thread_stack_size: None,
            root_drain_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration with the given root credit.
    #[must_use]
    pub fn new(credit: usize) -> Self {
        Self {
            credit,
            ..Self::default()
        }
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the worker thread stack size.
    #[must_use]
    pub const fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Bounds the root drain.
    #[must_use]
    pub const fn root_drain_timeout(mut self, timeout: Duration) -> Self {
        self.root_drain_timeout = Some(timeout);
        self
    }

    /// Applies environment overrides (`RAMIFY_CREDIT`, `RAMIFY_THREAD_NAME`).
    ///
    /// Invalid values are logged and ignored.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if let Ok(value) = std::env::var(CREDIT_ENV) {
            match value.parse::<usize>() {
                Ok(credit) => self.credit = credit,
                Err(_) => {
                    tracing::warn!(var = CREDIT_ENV, %value, "ignoring unparsable credit override");
                }
            }
        }
        if let Ok(value) = std::env::var(THREAD_NAME_ENV) {
            if value.is_empty() {
                tracing::warn!(var = THREAD_NAME_ENV, "ignoring empty thread name override");
            } else {
                self.thread_name_prefix = value;
            }
        }
        self
    }
}

/// A task-tree runtime: owns the root credit pool and runs trees against it.
///
/// The continuation passed to [`TreeRuntime::run`] is re-run from its top on
/// every branch; work before the first generator call should be cheap and
/// idempotent, and per-value work belongs downstream of the generator.
#[derive(Debug)]
pub struct TreeRuntime {
    config: RuntimeConfig,
    pool: CreditHandle,
}

impl TreeRuntime {
    /// Creates a runtime funding `credit` concurrent workers.
    #[must_use]
    pub fn new(credit: usize) -> Self {
        Self::with_config(RuntimeConfig::new(credit))
    }

    /// Creates a runtime from a full configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let pool = CreditPool::handle(config.credit);
        Self { config, pool }
    }

    /// Returns the spare credit in the root pool.
    #[must_use]
    pub fn credit_available(&self) -> usize {
        self.pool.available()
    }

    /// Runs a computation as the root of a new task tree and returns the
    /// bag of values its leaves emitted.
    ///
    /// The root runs on the calling thread; branches forked below it run on
    /// their own workers subject to credit. The call returns once the whole
    /// tree has quiesced. The first failure anywhere in the tree cancels the
    /// failing subtree and its siblings and surfaces here as `Err`.
    pub fn run<T, R, F>(&self, continuation: F) -> Result<Vec<R>, BranchError>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(&mut Cx<T, R>) -> Result<(), BranchError> + Send + Sync + 'static,
    {
        let shared = Arc::new(TreeShared::new(
            self.config.thread_name_prefix.clone(),
            self.config.thread_stack_size,
        ));
        let mut root = Cx::root(Arc::clone(&self.pool), shared, Arc::new(continuation));
        tracing::debug!(root = %root.id(), credit = self.config.credit, "task tree started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner::run_branch(&mut root)));
        let exception = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(BranchError::panicked(panic_message(payload.as_ref()))),
        };
        if exception.is_some() {
            root.kill_children();
        }
        let exception =
            reaper::drain_deadline(&mut root, exception, self.config.root_drain_timeout);
        match exception {
            Some(error) => {
                tracing::debug!(root = %root.id(), %error, "task tree failed");
                Err(error)
            }
            None => {
                let results = root.take_results();
                tracing::debug!(root = %root.id(), leaves = results.len(), "task tree quiesced");
                Ok(results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn defaults_are_sane() {
        init_test_logging();
        let config = RuntimeConfig::default();
        assert!(config.credit >= 1);
        assert_eq!(config.thread_name_prefix, "ramify-worker");
        assert!(config.root_drain_timeout.is_none());
    }

    #[test]
    fn builder_setters_apply() {
        init_test_logging();
        let config = RuntimeConfig::new(2)
            .thread_name_prefix("probe")
            .thread_stack_size(128 * 1024)
            .root_drain_timeout(Duration::from_secs(5));
        assert_eq!(config.credit, 2);
        assert_eq!(config.thread_name_prefix, "probe");
        assert_eq!(config.thread_stack_size, Some(128 * 1024));
        assert_eq!(config.root_drain_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn plain_root_computation_returns_its_bag() {
        init_test_logging();
        let runtime = TreeRuntime::new(2);
        let results = runtime
            .run::<i32, _, _>(|cx| {
                cx.emit("alpha");
                cx.emit("beta");
                Ok(())
            })
            .expect("root ran");
        assert_eq!(results, vec!["alpha", "beta"]);
        assert_eq!(runtime.credit_available(), 2);
    }

    #[test]
    fn root_panic_is_converted() {
        init_test_logging();
        let runtime = TreeRuntime::new(1);
        let outcome = runtime.run::<i32, i32, _>(|_cx| panic!("root blew up"));
        match outcome {
            Err(BranchError::Panicked(message)) => assert_eq!(message, "root blew up"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(runtime.credit_available(), 1);
    }

    #[test]
    fn root_error_drops_partial_results() {
        init_test_logging();
        let runtime = TreeRuntime::new(1);
        let outcome = runtime.run::<i32, i32, _>(|cx| {
            cx.emit(1);
            Err(BranchError::action("root failure"))
        });
        assert_eq!(outcome, Err(BranchError::action("root failure")));
    }
}
