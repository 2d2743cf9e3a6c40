//! Per-unit error ceiling.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CeilingCheck {
    Allowed,
    /// `first` is set only on the first skipped run since the ceiling was
    /// reached.
    Suppressed { first: bool },
}

#[derive(Debug, Default)]
struct Failures {
    count: usize,
    warned: bool,
}

/// Counts consecutive failures per compiled unit on one worker.
#[derive(Debug, Default)]
pub(crate) struct ErrorCeiling {
    units: HashMap<u64, Failures>,
}

impl ErrorCeiling {
    /// `limit` of 0 never suppresses.
    pub(crate) fn check(&mut self, unit: u64, limit: usize) -> CeilingCheck {
        if limit == 0 {
            return CeilingCheck::Allowed;
        }
        match self.units.get_mut(&unit) {
            Some(f) if f.count >= limit => {
                let first = !f.warned;
                f.warned = true;
                CeilingCheck::Suppressed { first }
            }
            _ => CeilingCheck::Allowed,
        }
    }

    pub(crate) fn record_failure(&mut self, unit: u64) {
        self.units.entry(unit).or_default().count += 1;
    }

    pub(crate) fn record_success(&mut self, unit: u64) {
        self.units.remove(&unit);
    }

    /// Drop the record of a unit that no longer exists.
    pub(crate) fn forget(&mut self, unit: u64) {
        self.units.remove(&unit);
    }

    pub(crate) fn failures(&self, unit: u64) -> usize {
        self.units.get(&unit).map_or(0, |f| f.count)
    }
}
