//! Out-of-band telemetry for the fast mixer
//!
//! The worker writes these counters freely on the hot path (plain atomic
//! stores, no fences it has to wait on); any other thread can read them at
//! any time without a lock. A reader that wants a *consistent* view uses
//! [`DumpState::snapshot`], which keys on the write-sequence odd/even
//! protocol: the worker bumps `write_sequence` immediately before and after
//! each sink write, so an odd value means a write is in flight and the
//! surrounding counters may be mid-update.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::state::snapshot::Command;

/// Jitter statistics over one accumulation window, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterStats {
    pub mean: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub stddev: f64,
}

/// Lock-free mixer telemetry
///
/// Monotonically-updated counters plus the most recent jitter window.
/// Shared as `Arc<DumpState>`; the worker is the only writer.
#[derive(Debug, Default)]
pub struct DumpState {
    /// Raw bits of the command the worker last acted on
    command: AtomicU32,
    /// Odd while a sink write is in flight; +2 per attempted write
    write_sequence: AtomicU32,
    /// Total frames accepted by the sink
    frames_written: AtomicU32,
    /// Tracks live after the last diff
    num_tracks: AtomicU32,
    /// Sink writes that returned an error
    write_errors: AtomicU32,
    /// Cycles classified late
    underruns: AtomicU32,
    /// Cycles classified early
    overruns: AtomicU32,
    // Jitter window, stored as f64 bit patterns
    mean_bits: AtomicU64,
    minimum_bits: AtomicU64,
    maximum_bits: AtomicU64,
    stddev_bits: AtomicU64,
}

/// A consistent copy of [`DumpState`], taken between sink writes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DumpSnapshot {
    pub command: Option<Command>,
    pub write_sequence: u32,
    pub frames_written: u32,
    pub num_tracks: u32,
    pub write_errors: u32,
    pub underruns: u32,
    pub overruns: u32,
    pub jitter: JitterStats,
}

impl DumpState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── worker-side writers ──────────────────────────────────────────────

    pub(crate) fn set_command(&self, command: Command) {
        self.command.store(command.bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_num_tracks(&self, n: u32) {
        self.num_tracks.store(n, Ordering::Relaxed);
    }

    /// Mark a sink write as in flight (sequence becomes odd)
    pub(crate) fn begin_write(&self) {
        self.write_sequence.fetch_add(1, Ordering::Release);
    }

    /// Mark the sink write finished (sequence becomes even again)
    pub(crate) fn end_write(&self) {
        self.write_sequence.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn add_frames_written(&self, frames: u32) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn incr_write_errors(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_underruns(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_overruns(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn store_jitter(&self, stats: JitterStats) {
        self.mean_bits.store(stats.mean.to_bits(), Ordering::Relaxed);
        self.minimum_bits.store(stats.minimum.to_bits(), Ordering::Relaxed);
        self.maximum_bits.store(stats.maximum.to_bits(), Ordering::Relaxed);
        self.stddev_bits.store(stats.stddev.to_bits(), Ordering::Relaxed);
    }

    // ── reader side ──────────────────────────────────────────────────────

    /// Raw write sequence; odd means a write is in flight
    pub fn write_sequence(&self) -> u32 {
        self.write_sequence.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u32 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn num_tracks(&self) -> u32 {
        self.num_tracks.load(Ordering::Relaxed)
    }

    /// Take a consistent snapshot of all counters
    ///
    /// Spins while a sink write is in flight or while a write completed
    /// mid-read; both windows are a few hundred nanoseconds.
    pub fn snapshot(&self) -> DumpSnapshot {
        loop {
            let seq_before = self.write_sequence.load(Ordering::Acquire);
            if seq_before & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let copy = DumpSnapshot {
                command: Command::from_bits(self.command.load(Ordering::Relaxed)),
                write_sequence: seq_before,
                frames_written: self.frames_written.load(Ordering::Relaxed),
                num_tracks: self.num_tracks.load(Ordering::Relaxed),
                write_errors: self.write_errors.load(Ordering::Relaxed),
                underruns: self.underruns.load(Ordering::Relaxed),
                overruns: self.overruns.load(Ordering::Relaxed),
                jitter: JitterStats {
                    mean: f64::from_bits(self.mean_bits.load(Ordering::Relaxed)),
                    minimum: f64::from_bits(self.minimum_bits.load(Ordering::Relaxed)),
                    maximum: f64::from_bits(self.maximum_bits.load(Ordering::Relaxed)),
                    stddev: f64::from_bits(self.stddev_bits.load(Ordering::Relaxed)),
                },
            };
            if self.write_sequence.load(Ordering::Acquire) == seq_before {
                return copy;
            }
        }
    }
}

impl std::fmt::Display for DumpSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "command={:?} writeSequence={} framesWritten={} numTracks={} \
             writeErrors={} underruns={} overruns={}",
            self.command,
            self.write_sequence,
            self.frames_written,
            self.num_tracks,
            self.write_errors,
            self.underruns,
            self.overruns,
        )?;
        if self.jitter != JitterStats::default() {
            write!(
                f,
                " cycle[ms] mean={:.3} min={:.3} max={:.3} stddev={:.3}",
                self.jitter.mean * 1e3,
                self.jitter.minimum * 1e3,
                self.jitter.maximum * 1e3,
                self.jitter.stddev * 1e3,
            )?;
        }
        Ok(())
    }
}
