//! Execution sessions and the timeout clock.

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{EngineSettings, WrapPolicy};

use super::worker::WorkerState;

/// Limits and modes of one session. Defaults come from the engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub timeout_secs: u64,
    pub max_stack_depth: usize,
    pub restricted: bool,
    pub wrap_policy: WrapPolicy,
}

impl SessionOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            timeout_secs: settings.timeout_secs,
            max_stack_depth: settings.max_stack_depth,
            restricted: settings.restricted,
            wrap_policy: settings.wrap_policy,
        }
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn wrap_policy(mut self, policy: WrapPolicy) -> Self {
        self.wrap_policy = policy;
        self
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub(crate) fn needs_hook(&self) -> bool {
        self.timeout_secs > 0 || self.max_stack_depth > 0
    }
}

/// The session active on a worker.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) options: SessionOptions,
    pub(crate) settings: Arc<EngineSettings>,
}

/// Wall-clock baseline shared by every run nested in one top-level run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clock {
    Idle,
    Running(Instant),
    /// The deadline was crossed and reported once. Stays quiet until the
    /// next top-level start.
    Fired,
}

impl Clock {
    /// Advance the clock against `limit`, returning whether it fires on
    /// this tick. Only the tick that crosses the deadline fires.
    pub(crate) fn tick(self, limit: Duration) -> (Clock, bool) {
        match self {
            Clock::Running(start) if start.elapsed() > limit => (Clock::Fired, true),
            other => (other, false),
        }
    }

    pub(crate) fn baseline(self) -> Option<Instant> {
        match self {
            Clock::Running(start) => Some(start),
            _ => None,
        }
    }
}

/// Keeps a session entered. Dropping the outermost guard ends the session.
pub struct SessionGuard {
    state: Rc<WorkerState>,
}

impl SessionGuard {
    pub(crate) fn new(state: Rc<WorkerState>) -> Self {
        Self { state }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.exit_session();
    }
}
