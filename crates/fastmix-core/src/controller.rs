//! Producer-side facade over the state queue
//!
//! The controller owns the working copy of the mixer state and is the only
//! writer. Every edit goes through a method here so the generation counters
//! the worker diffs against can never be forgotten: touching a track bumps
//! that track's generation *and* the table generation, rebinding the sink
//! bumps the sink generation, and entering cold idle arms the gate and
//! bumps the cold epoch. Each edit publishes a fresh immutable snapshot.
//!
//! The controller runs at normal priority; it may clone, allocate, and
//! retry. Only the worker side of the queue is realtime.

use std::sync::Arc;

use thiserror::Error;

use crate::provider::{BufferProvider, VolumeProvider};
use crate::sink::OutputSink;
use crate::state::cold::ColdGate;
use crate::state::queue::StateWriter;
use crate::state::snapshot::{Command, FastTrack, MixerState};
use crate::types::MAX_FAST_TRACKS;
use crate::worker::dump::DumpState;

/// Yield-and-retry attempts before a publish gives up
const PUBLISH_RETRIES: usize = 1024;

/// Errors from controller edits
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    /// Slot index is outside the track table
    #[error("track slot {0} out of range")]
    SlotOutOfRange(usize),

    /// The slot has no track to remove
    #[error("track slot {0} is empty")]
    SlotEmpty(usize),

    /// The worker stopped draining the queue
    #[error("state queue backlogged, worker not draining")]
    Backlogged,
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// The lower-priority side of the fast mixer
pub struct MixerController {
    writer: StateWriter,
    state: MixerState,
    cold_gate: Arc<ColdGate>,
    next_track_gen: u32,
}

impl MixerController {
    pub fn new(writer: StateWriter) -> Self {
        let cold_gate = Arc::new(ColdGate::new());
        let mut state = MixerState::initial();
        state.cold_gate = Some(cold_gate.clone());
        Self {
            writer,
            state,
            cold_gate,
            next_track_gen: 1,
        }
    }

    /// The working copy of the state (what the next publish will carry)
    pub fn state(&self) -> &MixerState {
        &self.state
    }

    /// The gate a cold-parked worker is woken through
    pub fn cold_gate(&self) -> Arc<ColdGate> {
        self.cold_gate.clone()
    }

    /// Give the worker a telemetry area to write into
    pub fn set_dump_state(&mut self, dump: Arc<DumpState>) -> ControllerResult<()> {
        self.state.dump_state = Some(dump);
        self.publish()
    }

    /// Bind (or unbind) the output sink and set the period length
    pub fn set_output_sink(
        &mut self,
        sink: Option<Arc<dyn OutputSink>>,
        frame_count: usize,
    ) -> ControllerResult<()> {
        self.state.output_sink = sink;
        self.state.output_sink_gen = self.state.output_sink_gen.wrapping_add(1);
        self.state.frame_count = frame_count;
        self.publish()
    }

    /// Install or reconfigure the track in `slot`
    ///
    /// An occupied slot is reconfigured in place (the worker sees a
    /// "modified" track); an empty one becomes active ("added").
    pub fn set_track(
        &mut self,
        slot: usize,
        buffer_provider: Arc<dyn BufferProvider>,
        volume_provider: Option<Arc<dyn VolumeProvider>>,
    ) -> ControllerResult<()> {
        if slot >= MAX_FAST_TRACKS {
            return Err(ControllerError::SlotOutOfRange(slot));
        }
        let generation = self.next_track_gen;
        self.next_track_gen = self.next_track_gen.wrapping_add(1);
        self.state.tracks[slot] = Some(FastTrack {
            buffer_provider,
            volume_provider,
            generation,
        });
        self.state.track_mask |= 1 << slot;
        self.bump_table_gen();
        self.publish()
    }

    /// Deactivate the track in `slot`
    pub fn remove_track(&mut self, slot: usize) -> ControllerResult<()> {
        if slot >= MAX_FAST_TRACKS {
            return Err(ControllerError::SlotOutOfRange(slot));
        }
        if self.state.track_mask & (1 << slot) == 0 {
            return Err(ControllerError::SlotEmpty(slot));
        }
        self.state.tracks[slot] = None;
        self.state.track_mask &= !(1 << slot);
        self.bump_table_gen();
        self.publish()
    }

    /// Run mix cycles without writing
    pub fn mix(&mut self) -> ControllerResult<()> {
        self.set_command(Command::Mix)
    }

    /// Run write cycles without mixing
    pub fn write_only(&mut self) -> ControllerResult<()> {
        self.set_command(Command::Write)
    }

    /// Run full mix-then-write cycles
    pub fn mix_write(&mut self) -> ControllerResult<()> {
        self.set_command(Command::MixWrite)
    }

    /// Idle, keeping the worker warm (1 ms wakeups)
    pub fn hot_idle(&mut self) -> ControllerResult<()> {
        self.set_command(Command::HotIdle)
    }

    /// Park the worker until [`wake`](Self::wake)
    ///
    /// Arms the gate and opens a new cold epoch, so the worker decrements
    /// and parks exactly once no matter how often this state is observed.
    pub fn cold_idle(&mut self) -> ControllerResult<()> {
        self.cold_gate.arm();
        self.state.cold_gen = self.state.cold_gen.wrapping_add(1);
        self.state.command = Command::ColdIdle;
        self.publish()
    }

    /// Wake a cold-parked worker
    ///
    /// Publish the state to resume into first, then wake; the worker polls
    /// as soon as it comes off the gate.
    pub fn wake(&self) {
        self.cold_gate.open();
    }

    /// Tell the worker to tear down and terminate
    pub fn exit(&mut self) -> ControllerResult<()> {
        self.state.command = Command::Exit;
        self.publish()?;
        // a cold-parked worker must come off the gate to see EXIT
        self.wake();
        Ok(())
    }

    fn set_command(&mut self, command: Command) -> ControllerResult<()> {
        self.state.command = command;
        self.publish()
    }

    fn bump_table_gen(&mut self) {
        self.state.fast_tracks_gen = self.state.fast_tracks_gen.wrapping_add(1);
    }

    /// Publish the working state as a new snapshot
    ///
    /// The ring only fills when the worker is parked or starved, so on a
    /// full ring we wake the gate and retry. A worker woken this way does
    /// not re-park for its current cold epoch; publish a fresh cold idle to
    /// park it again.
    fn publish(&mut self) -> ControllerResult<()> {
        if self.writer.publish(self.state.clone()).is_ok() {
            return Ok(());
        }
        self.cold_gate.open();
        for _ in 0..PUBLISH_RETRIES {
            std::thread::yield_now();
            if self.writer.publish(self.state.clone()).is_ok() {
                return Ok(());
            }
        }
        log::error!("state queue backlogged after {} retries", PUBLISH_RETRIES);
        Err(ControllerError::Backlogged)
    }
}
