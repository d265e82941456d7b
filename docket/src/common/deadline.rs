use crate::errors::{DocketError, DocketResult, ErrorKind};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::DEFAULT_YIELD_INTERVAL;

static TIME_LIMIT_ERROR: Lazy<DocketError> = Lazy::new(|| {
    DocketError::new(
        "Operation exceeded time limit",
        ErrorKind::TimeLimitExceeded,
    )
});

/// Per-operation execution context carrying the deadline and kill flag.
///
/// Long-running work (collection scans, index back-fills, blocking pipeline
/// stages) calls [`OpContext::checkpoint`] at its yield points. A checkpoint
/// fails with `TimeLimitExceeded` once the deadline has passed, or with
/// `InvalidOperation` when the operation was killed externally (collection
/// drop interrupting an index build).
///
/// Cloning shares the kill flag; the elapsed-count is per-clone so concurrent
/// consumers each check the clock at their own cadence.
#[derive(Clone)]
pub struct OpContext {
    deadline: Option<Instant>,
    killed: Arc<AtomicBool>,
    yield_interval: u32,
}

impl OpContext {
    /// A context with no deadline.
    pub fn unbounded() -> Self {
        OpContext {
            deadline: None,
            killed: Arc::new(AtomicBool::new(false)),
            yield_interval: DEFAULT_YIELD_INTERVAL,
        }
    }

    /// A context that expires `max_time` from now.
    pub fn with_max_time(max_time: Duration) -> Self {
        OpContext {
            deadline: Some(Instant::now() + max_time),
            killed: Arc::new(AtomicBool::new(false)),
            yield_interval: DEFAULT_YIELD_INTERVAL,
        }
    }

    pub(crate) fn with_yield_interval(mut self, interval: u32) -> Self {
        self.yield_interval = interval.max(1);
        self
    }

    /// Marks the operation as killed. The next checkpoint reports the error.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Checks the deadline and kill flag. Cheap enough to call per record.
    pub fn checkpoint(&self) -> DocketResult<()> {
        if self.is_killed() {
            log::warn!("Operation killed at yield point");
            return Err(DocketError::new(
                "Operation was interrupted",
                ErrorKind::InvalidOperation,
            ));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                log::warn!("Operation exceeded its time limit");
                return Err(TIME_LIMIT_ERROR.clone());
            }
        }
        Ok(())
    }

    /// Creates a ticker that calls [`Self::checkpoint`] every
    /// `yield_interval` ticks.
    pub fn ticker(&self) -> YieldTicker {
        YieldTicker {
            ctx: self.clone(),
            count: 0,
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Counts records between yield points; see [`OpContext`].
pub struct YieldTicker {
    ctx: OpContext,
    count: u32,
}

impl YieldTicker {
    /// Registers one unit of work, checking the deadline at the configured
    /// interval.
    pub fn tick(&mut self) -> DocketResult<()> {
        self.count += 1;
        if self.count >= self.ctx.yield_interval {
            self.count = 0;
            self.ctx.checkpoint()?;
        }
        Ok(())
    }
}
