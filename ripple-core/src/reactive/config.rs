//! Runtime configuration.

use std::rc::Rc;

use super::microtask::{ManualMicrotasks, MicrotaskQueue};
use super::runtime::Runtime;

/// Tunables for one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Runs of any single effect allowed in one flush before it fails with
    /// `MaxUpdateDepthExceeded`.
    pub max_flush_iterations: usize,

    /// Warn when an effect writes a signal owned by an unrelated effect.
    pub ownership_warnings: bool,

    /// Writes to disposed signals fail instead of being ignored.
    pub strict_disposed_writes: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: 1000,
            ownership_warnings: cfg!(debug_assertions),
            strict_disposed_writes: cfg!(debug_assertions),
        }
    }
}

/// Builder returned by [`Runtime::builder`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    microtasks: Option<Rc<dyn MicrotaskQueue>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_flush_iterations(mut self, limit: usize) -> Self {
        self.config.max_flush_iterations = limit;
        self
    }

    pub fn ownership_warnings(mut self, enabled: bool) -> Self {
        self.config.ownership_warnings = enabled;
        self
    }

    pub fn strict_disposed_writes(mut self, enabled: bool) -> Self {
        self.config.strict_disposed_writes = enabled;
        self
    }

    /// Host used to defer flushes. Defaults to [`ManualMicrotasks`].
    pub fn microtasks(mut self, queue: impl MicrotaskQueue + 'static) -> Self {
        self.microtasks = Some(Rc::new(queue));
        self
    }

    pub fn build(self) -> Runtime {
        let microtasks = self
            .microtasks
            .unwrap_or_else(|| Rc::new(ManualMicrotasks::new()));
        Runtime::from_parts(self.config, microtasks)
    }
}
