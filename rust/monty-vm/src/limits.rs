//! Resource limits: deadline, allocation caps, heap cap, recursion depth.

use crate::exception::{ResourceError, RunError, RunResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Configuration for resource limits during code execution.
///
/// All limits are optional; a missing limit is unenforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of heap allocations allowed (monotone per execution).
    pub max_allocations: Option<u64>,
    /// Maximum wallclock execution time.
    pub max_duration: Option<Duration>,
    /// Maximum live heap memory in bytes.
    pub max_memory: Option<usize>,
    /// Run a heap sweep every N allocations.
    pub gc_interval: Option<u64>,
    /// Maximum function call depth (default 1000).
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_allocations(mut self, n: u64) -> Self {
        self.max_allocations = Some(n);
        self
    }

    pub fn max_duration(mut self, d: Duration) -> Self {
        self.max_duration = Some(d);
        self
    }

    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    pub fn gc_interval(mut self, n: u64) -> Self {
        self.gc_interval = Some(n);
        self
    }

    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = Some(depth);
        self
    }
}

pub(crate) const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Dispatch checks the deadline once per this many instructions.
pub(crate) const DEADLINE_CHECK_INTERVAL: u64 = 4096;

/// Per-execution limit tracking. The deadline is absolute; `dump` persists
/// the remaining duration and `load` re-anchors it.
#[derive(Debug, Clone)]
pub(crate) struct LimitTracker {
    deadline: Option<Instant>,
    max_recursion_depth: usize,
    instr_count: u64,
}

impl LimitTracker {
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            deadline: limits.max_duration.map(|d| Instant::now() + d),
            max_recursion_depth: limits.max_recursion_depth.unwrap_or(DEFAULT_RECURSION_LIMIT),
            instr_count: 0,
        }
    }

    /// Remaining time until the deadline, for serialisation.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Restore a tracker from a persisted remaining duration.
    pub fn restore(remaining: Option<Duration>, max_recursion_depth: usize) -> Self {
        Self {
            deadline: remaining.map(|d| Instant::now() + d),
            max_recursion_depth,
            instr_count: 0,
        }
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    /// Per-instruction bookkeeping; checks the deadline every
    /// [`DEADLINE_CHECK_INTERVAL`] instructions.
    #[inline]
    pub fn tick(&mut self) -> RunResult<()> {
        self.instr_count = self.instr_count.wrapping_add(1);
        if self.instr_count % DEADLINE_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    /// Unconditional deadline check, used at frame transitions.
    pub fn check_deadline(&self) -> RunResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(RunError::Resource(ResourceError::Timeout(
                    "execution deadline exceeded".to_string(),
                )));
            }
        }
        Ok(())
    }

    pub fn check_recursion(&self, depth: usize) -> RunResult<()> {
        if depth > self.max_recursion_depth {
            return Err(RunError::Resource(ResourceError::Recursion(
                "maximum recursion depth exceeded".to_string(),
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains() {
        let limits = ResourceLimits::new()
            .max_allocations(1000)
            .max_duration(Duration::from_secs(5))
            .max_memory(1 << 20);
        assert_eq!(limits.max_allocations, Some(1000));
        assert_eq!(limits.max_memory, Some(1 << 20));
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let limits = ResourceLimits::new().max_duration(Duration::ZERO);
        let tracker = LimitTracker::new(&limits);
        assert!(matches!(
            tracker.check_deadline(),
            Err(RunError::Resource(ResourceError::Timeout(_)))
        ));
    }

    #[test]
    fn recursion_limit_enforced() {
        let tracker = LimitTracker::new(&ResourceLimits::new().max_recursion_depth(10));
        assert!(tracker.check_recursion(10).is_ok());
        assert!(tracker.check_recursion(11).is_err());
    }

    #[test]
    fn limits_serde_round_trip() {
        let limits = ResourceLimits::new().max_memory(4096).gc_interval(100);
        let json = serde_json::to_string(&limits).unwrap();
        let back: ResourceLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(limits, back);
    }
}
