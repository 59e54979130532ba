//! Mixer state snapshots
//!
//! A `MixerState` is one immutable snapshot of everything the worker needs to
//! run: the command, the track table, the sink binding, and the generation
//! counters that let the worker detect reconfiguration without deep
//! comparison. The controller builds a snapshot, publishes it through the
//! state queue, and never mutates it again.

use std::sync::Arc;

use crate::provider::{BufferProvider, VolumeProvider};
use crate::sink::OutputSink;
use crate::state::cold::ColdGate;
use crate::types::MAX_FAST_TRACKS;
use crate::worker::dump::DumpState;

/// Worker command, as carried in each snapshot
///
/// The discriminants are bit-flags: `MIX` and `WRITE` are independent bits
/// (`MIX_WRITE` is their union), and `HOT_IDLE` / `COLD_IDLE` share the idle
/// bit. The enum is closed, so an out-of-range command is unrepresentable;
/// raw values from outside the crate go through [`Command::from_bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Distinguished value of the initial state; behaves like hot idle
    Initial = 0x1,
    /// Idle, but keep waking every millisecond so resume is cheap
    HotIdle = 0x2,
    /// Idle and park on the cold gate until the controller wakes us
    ColdIdle = 0x3,
    /// Tear down and terminate the worker
    Exit = 0x4,
    /// Run the mix step only
    Mix = 0x8,
    /// Run the write step only
    Write = 0x10,
    /// Mix, then write
    MixWrite = 0x18,
}

impl Command {
    /// Idle bit, shared by `HotIdle` and `ColdIdle`
    const IDLE_BIT: u32 = 0x2;
    /// Mix bit
    const MIX_BIT: u32 = 0x8;
    /// Write bit
    const WRITE_BIT: u32 = 0x10;

    /// The raw bit pattern
    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Decode a raw bit pattern; `None` for anything out of range
    pub fn from_bits(bits: u32) -> Option<Command> {
        match bits {
            0x1 => Some(Command::Initial),
            0x2 => Some(Command::HotIdle),
            0x3 => Some(Command::ColdIdle),
            0x4 => Some(Command::Exit),
            0x8 => Some(Command::Mix),
            0x10 => Some(Command::Write),
            0x18 => Some(Command::MixWrite),
            _ => None,
        }
    }

    /// True for `HotIdle` and `ColdIdle`
    #[inline]
    pub fn is_idle(self) -> bool {
        self.bits() & Self::IDLE_BIT != 0
    }

    /// True when the cycle includes the mix step
    #[inline]
    pub fn mixes(self) -> bool {
        self.bits() & Self::MIX_BIT != 0
    }

    /// True when the cycle includes the write step
    #[inline]
    pub fn writes(self) -> bool {
        self.bits() & Self::WRITE_BIT != 0
    }
}

/// One active low-latency voice
///
/// `generation` is bumped by the controller whenever any field changes, so
/// the worker can detect a reconfigured slot without comparing providers.
#[derive(Clone)]
pub struct FastTrack {
    /// Source of PCM frames; always present in an occupied slot
    pub buffer_provider: Arc<dyn BufferProvider>,
    /// Optional per-cycle volume source; absent means unity gain
    pub volume_provider: Option<Arc<dyn VolumeProvider>>,
    /// Bumped on every controller-side mutation of this slot
    pub generation: u32,
}

impl std::fmt::Debug for FastTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastTrack")
            .field("generation", &self.generation)
            .field("has_volume_provider", &self.volume_provider.is_some())
            .finish()
    }
}

/// One immutable snapshot of the mixer configuration
///
/// Published atomically through the state queue; the worker observes a
/// consistent view and never writes back.
#[derive(Clone)]
pub struct MixerState {
    /// What the worker should do each cycle
    pub command: Command,
    /// Fixed-size track table; bit i of `track_mask` says slot i is live
    pub tracks: [Option<FastTrack>; MAX_FAST_TRACKS],
    /// Bit-set of occupied slots
    pub track_mask: u32,
    /// Generation of the track table as a whole; bumped whenever
    /// `track_mask` or any track's generation changes
    pub fast_tracks_gen: u32,
    /// Frames per output period
    pub frame_count: usize,
    /// Current output sink binding
    pub output_sink: Option<Arc<dyn OutputSink>>,
    /// Bumped whenever `output_sink` changes
    pub output_sink_gen: u32,
    /// One-shot wakeup gate for cold idle
    pub cold_gate: Option<Arc<ColdGate>>,
    /// Cold-idle epoch; each new value is acknowledged exactly once
    pub cold_gen: u32,
    /// Externally owned telemetry area, if the controller wants one
    pub dump_state: Option<Arc<DumpState>>,
}

impl MixerState {
    /// The distinguished initial state: no tracks, no sink, command `Initial`
    pub fn initial() -> Self {
        Self {
            command: Command::Initial,
            tracks: std::array::from_fn(|_| None),
            track_mask: 0,
            fast_tracks_gen: 0,
            frame_count: 0,
            output_sink: None,
            output_sink_gen: 0,
            cold_gate: None,
            cold_gen: 0,
            dump_state: None,
        }
    }
}

impl std::fmt::Debug for MixerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerState")
            .field("command", &self.command)
            .field("track_mask", &format_args!("{:#010b}", self.track_mask))
            .field("fast_tracks_gen", &self.fast_tracks_gen)
            .field("frame_count", &self.frame_count)
            .field("output_sink_gen", &self.output_sink_gen)
            .field("cold_gen", &self.cold_gen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bit_flags() {
        assert_eq!(
            Command::MixWrite.bits(),
            Command::Mix.bits() | Command::Write.bits()
        );
        assert!(Command::MixWrite.mixes());
        assert!(Command::MixWrite.writes());
        assert!(Command::Mix.mixes());
        assert!(!Command::Mix.writes());
        assert!(Command::Write.writes());
        assert!(!Command::Write.mixes());
    }

    #[test]
    fn test_idle_bit_shared() {
        assert!(Command::HotIdle.is_idle());
        assert!(Command::ColdIdle.is_idle());
        assert!(!Command::Initial.is_idle());
        assert!(!Command::Exit.is_idle());
        assert!(!Command::MixWrite.is_idle());
    }

    #[test]
    fn test_command_decode_rejects_garbage() {
        assert_eq!(Command::from_bits(0x18), Some(Command::MixWrite));
        assert_eq!(Command::from_bits(0x0), None);
        assert_eq!(Command::from_bits(0x20), None);
        assert_eq!(Command::from_bits(0x9), None);
    }

    #[test]
    fn test_initial_state_is_empty() {
        let s = MixerState::initial();
        assert_eq!(s.command, Command::Initial);
        assert_eq!(s.track_mask, 0);
        assert_eq!(s.frame_count, 0);
        assert!(s.tracks.iter().all(|t| t.is_none()));
        assert!(s.output_sink.is_none());
        assert!(s.dump_state.is_none());
    }
}
