//! Cycle timing control
//!
//! The worker wants to wake exactly once per device period. After every
//! working cycle it reads the monotonic clock, compares the interval since
//! the previous cycle against the expected period, and picks the next sleep:
//!
//! - a *late* wake (underrun) means the sink was starved; busy-wait to catch
//!   up and don't trust the next interval measurement,
//! - an *early* wake (overrun) means we are burning CPU ahead of the device;
//!   sleep most of a period to re-align,
//! - a nominal cycle busy-waits, trading CPU for minimum wake latency.
//!
//! Intervals are also accumulated into a jitter window that is flushed to
//! the dump state every [`STATS_WINDOW`] samples.

use crate::worker::dump::{DumpState, JitterStats};

/// Samples per jitter window
const STATS_WINDOW: u32 = 1000;

/// What the worker should do at the top of the next cycle
///
/// Encoded in the source of this design as a signed nanosecond count:
/// -1 busy-waits, 0 yields, positive suspends for that long (always under a
/// second).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPolicy {
    /// Do not suspend; loop again immediately
    BusyWait,
    /// Give up the processor without suspending
    Yield,
    /// Suspend for this many nanoseconds (< 1e9)
    Sleep(u64),
}

impl SleepPolicy {
    /// Positive nanoseconds suspend, zero yields
    #[inline]
    pub fn sleep_ns(ns: u64) -> Self {
        if ns == 0 {
            SleepPolicy::Yield
        } else {
            SleepPolicy::Sleep(ns)
        }
    }

    /// The classic signed encoding: -1 busy-wait, 0 yield, >0 nanosleep
    #[inline]
    pub fn as_ns(self) -> i64 {
        match self {
            SleepPolicy::BusyWait => -1,
            SleepPolicy::Yield => 0,
            SleepPolicy::Sleep(ns) => ns as i64,
        }
    }

    /// Perform the sleep on the current thread
    pub fn apply(self) {
        match self {
            SleepPolicy::BusyWait => {}
            SleepPolicy::Yield => std::thread::yield_now(),
            SleepPolicy::Sleep(ns) => {
                debug_assert!(ns < 1_000_000_000);
                std::thread::sleep(std::time::Duration::from_nanos(ns));
            }
        }
    }
}

/// Welford accumulator over cycle intervals in seconds
#[derive(Debug, Default)]
struct CycleStats {
    n: u32,
    mean: f64,
    m2: f64,
    minimum: f64,
    maximum: f64,
}

impl CycleStats {
    fn sample(&mut self, x: f64) {
        self.n += 1;
        if self.n == 1 {
            self.minimum = x;
            self.maximum = x;
        } else {
            self.minimum = self.minimum.min(x);
            self.maximum = self.maximum.max(x);
        }
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn stats(&self) -> JitterStats {
        let stddev = if self.n > 1 {
            (self.m2 / (self.n - 1) as f64).sqrt()
        } else {
            0.0
        };
        JitterStats {
            mean: self.mean,
            minimum: self.minimum,
            maximum: self.maximum,
            stddev,
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Measures cycle intervals and decides the next sleep
///
/// Thresholds are derived from the current frame count and sample rate at
/// reconfiguration time; the measurement baseline is invalidated on idle
/// entry so the first interval after resume is never classified.
#[derive(Debug)]
pub struct TimingController {
    period_ns: u64,
    underrun_ns: u64,
    overrun_ns: u64,
    old_ts_ns: Option<u64>,
    ignore_next_overrun: bool,
    stats: CycleStats,
}

impl TimingController {
    pub fn new() -> Self {
        Self {
            period_ns: 0,
            underrun_ns: 0,
            overrun_ns: 0,
            old_ts_ns: None,
            ignore_next_overrun: true,
            stats: CycleStats::default(),
        }
    }

    /// Derive thresholds for a new output configuration
    ///
    /// `period = frame_count / sample_rate`; a cycle longer than 1.75
    /// periods is an underrun, shorter than 0.25 periods an overrun. A zero
    /// frame count or sample rate clears the thresholds and timing is
    /// suspended until a valid configuration arrives.
    pub fn configure(&mut self, frame_count: usize, sample_rate: u32) {
        if frame_count > 0 && sample_rate > 0 {
            let fc = frame_count as u64;
            let sr = sample_rate as u64;
            self.period_ns = fc * 1_000_000_000 / sr;
            self.underrun_ns = fc * 1_750_000_000 / sr;
            self.overrun_ns = fc * 250_000_000 / sr;
        } else {
            self.period_ns = 0;
            self.underrun_ns = 0;
            self.overrun_ns = 0;
        }
    }

    /// Drop the measurement baseline; the next interval will not be
    /// classified and the next overrun is suppressed
    pub fn invalidate(&mut self) {
        self.old_ts_ns = None;
        self.ignore_next_overrun = true;
    }

    /// Record the end-of-cycle timestamp and choose the next sleep
    pub fn end_cycle(&mut self, now_ns: u64, dump: &DumpState) -> SleepPolicy {
        if self.period_ns == 0 {
            // Not configured; nothing to measure against
            self.old_ts_ns = None;
            return SleepPolicy::Yield;
        }

        let Some(old_ns) = self.old_ts_ns else {
            // First cycle after start, idle, or reconfiguration: the
            // interval would compare against an unrelated wake-up
            self.old_ts_ns = Some(now_ns);
            self.ignore_next_overrun = true;
            return SleepPolicy::sleep_ns(self.period_ns);
        };

        let delta_ns = now_ns.saturating_sub(old_ns);
        self.old_ts_ns = Some(now_ns);

        let policy = if delta_ns > self.underrun_ns {
            log::debug!("underrun: {} ns since last cycle", delta_ns);
            dump.incr_underruns();
            self.ignore_next_overrun = true;
            SleepPolicy::BusyWait
        } else if delta_ns < self.overrun_ns {
            if self.ignore_next_overrun {
                self.ignore_next_overrun = false;
            } else {
                log::debug!("overrun: {} ns since last cycle", delta_ns);
                dump.incr_overruns();
            }
            SleepPolicy::sleep_ns(self.period_ns - self.overrun_ns)
        } else {
            self.ignore_next_overrun = false;
            SleepPolicy::BusyWait
        };

        self.stats.sample(delta_ns as f64 * 1e-9);
        if self.stats.n >= STATS_WINDOW {
            dump.store_jitter(self.stats.stats());
            self.stats.reset();
        }

        policy
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    pub fn underrun_ns(&self) -> u64 {
        self.underrun_ns
    }

    pub fn overrun_ns(&self) -> u64 {
        self.overrun_ns
    }

    /// True while the next overrun classification is suppressed
    pub fn ignores_next_overrun(&self) -> bool {
        self.ignore_next_overrun
    }

    /// True once a baseline timestamp exists
    pub fn baseline_valid(&self) -> bool {
        self.old_ts_ns.is_some()
    }
}

impl Default for TimingController {
    fn default() -> Self {
        Self::new()
    }
}
