//! Output sink interface
//!
//! The worker hands each finished mix buffer to an `OutputSink`. The write
//! must be non-blocking: a sink that parks the realtime thread defeats the
//! whole fast path, so blocking implementations are rejected by contract
//! rather than tolerated and timed around.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::types::Sample;

/// Sample encodings a sink can accept
///
/// The fast path produces 16-bit signed interleaved PCM only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    PcmI16,
}

/// The negotiated format of an output sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub encoding: SampleEncoding,
}

/// Errors a sink write can report
///
/// A failed write is counted and the cycle moves on; the worker never
/// retries within a cycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The sink cannot accept frames right now
    #[error("sink backlogged, try next cycle")]
    Backlogged,

    /// The sink is gone and will not accept frames again
    #[error("sink closed")]
    Closed,
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Non-blocking PCM writer
///
/// `write` is called on the realtime thread and must not block, lock, or
/// allocate. It consumes up to `frames` stereo frames from `buf` (interleaved,
/// `2 * frames` samples) and returns how many frames were accepted.
pub trait OutputSink: Send + Sync {
    /// The sink's negotiated format; stable for the lifetime of one binding
    fn format(&self) -> SinkFormat;

    /// Write `frames` stereo frames; returns frames accepted
    fn write(&self, buf: &[Sample], frames: usize) -> SinkResult<usize>;
}

/// A sink that accepts and discards everything
///
/// Useful for bring-up and load measurement: it behaves like a perfectly
/// non-blocking device and counts what it was given.
#[derive(Debug)]
pub struct NullSink {
    format: SinkFormat,
    frames_accepted: AtomicU64,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            format: SinkFormat {
                sample_rate,
                channel_count: 2,
                encoding: SampleEncoding::PcmI16,
            },
            frames_accepted: AtomicU64::new(0),
        }
    }

    /// Total frames accepted since creation
    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted.load(Ordering::Relaxed)
    }
}

impl OutputSink for NullSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn write(&self, _buf: &[Sample], frames: usize) -> SinkResult<usize> {
        self.frames_accepted.fetch_add(frames as u64, Ordering::Relaxed);
        Ok(frames)
    }
}
