//! The realtime mixing worker
//!
//! One dedicated thread runs [`FastMixer::run`]: an indefinite cycle of
//! *sleep or yield → poll for new state → diff against the previous state →
//! run the command → measure wall time → decide the next sleep*. The loop
//! never takes a lock, never allocates outside reconfiguration boundaries,
//! and blocks in exactly three places: the voluntary sleep at the top of the
//! cycle, the cold-idle gate (once per cold epoch), and the sink write,
//! which is non-blocking by contract.
//!
//! The cycle body is factored into [`FastMixer::cycle`] so tests can drive
//! single iterations without a thread or a clock.

pub mod dump;
pub mod timing;
pub mod tracks;

use std::sync::Arc;
use std::time::Instant;

use basedrop::{Handle, Owned, Shared};

use crate::engine::{EngineFactory, FixedPointMixer, MixEngine};
use crate::reclaim;
use crate::sink::{OutputSink, SinkFormat};
use crate::state::queue::StateReader;
use crate::state::snapshot::{Command, MixerState};
use crate::types::{Sample, HOT_IDLE_NS, MAX_FAST_TRACKS};

use self::dump::DumpState;
use self::timing::{SleepPolicy, TimingController};
use self::tracks::TrackTable;

/// What the mix buffer currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MixBufferState {
    /// Stale or never written; must not reach the sink as-is
    Undefined,
    /// Holds the output of this cycle's mix step
    Mixed,
    /// Explicitly silenced
    Zeroed,
}

/// Outcome of one worker cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    /// Keep going; apply this sleep before the next cycle
    Continue(SleepPolicy),
    /// EXIT was serviced; the worker is done
    Exit,
}

/// The realtime mixing worker
///
/// Owns everything it touches on the hot path. The only inputs are the
/// state queue (snapshots from the controller) and the collaborators each
/// snapshot carries; the only outputs are sink writes and dump counters.
pub struct FastMixer {
    reader: StateReader,
    engine_factory: EngineFactory,
    collector: Handle,

    /// Newest observed snapshot
    current: Shared<MixerState>,
    /// Last non-idle snapshot, pinned across idle periods
    previous: Shared<MixerState>,

    /// Engine and buffer exist together, sized for the current format;
    /// wrapped in `Owned` so retiring them never frees on this thread
    engine: Option<Owned<Box<dyn MixEngine>>>,
    mix_buffer: Option<Owned<Vec<Sample>>>,
    mix_buffer_state: MixBufferState,

    output_sink: Option<Arc<dyn OutputSink>>,
    output_sink_gen: u32,
    format: Option<SinkFormat>,
    sample_rate: u32,

    tracks: TrackTable,
    /// Last acknowledged cold-idle epoch
    cold_gen: u32,
    timing: TimingController,

    /// Active dump area; the fallback until a snapshot provides one
    dump: Arc<DumpState>,
    fallback_dump: Arc<DumpState>,

    /// Base for monotonic nanosecond timestamps
    epoch: Instant,
}

impl FastMixer {
    /// Worker with the built-in fixed-point engine
    pub fn new(reader: StateReader) -> Self {
        Self::with_engine_factory(reader, FixedPointMixer::factory())
    }

    /// Worker with a caller-supplied engine factory
    ///
    /// The factory runs on the worker thread at reconfiguration time with
    /// (frame count, sample rate, track capacity).
    pub fn with_engine_factory(reader: StateReader, engine_factory: EngineFactory) -> Self {
        let collector = reclaim::handle();
        let initial = Shared::new(&collector, MixerState::initial());
        let fallback_dump = Arc::new(DumpState::new());
        Self {
            reader,
            engine_factory,
            collector,
            current: initial.clone(),
            previous: initial,
            engine: None,
            mix_buffer: None,
            mix_buffer_state: MixBufferState::Undefined,
            output_sink: None,
            output_sink_gen: 0,
            format: None,
            sample_rate: 0,
            tracks: TrackTable::new(),
            cold_gen: 0,
            timing: TimingController::new(),
            dump: fallback_dump.clone(),
            fallback_dump,
            epoch: Instant::now(),
        }
    }

    /// Run the worker loop until EXIT
    pub fn run(mut self) {
        log::info!("fast mixer worker running");
        loop {
            match self.cycle() {
                CycleResult::Continue(sleep) => sleep.apply(),
                CycleResult::Exit => break,
            }
        }
        log::info!("fast mixer worker exited");
    }

    /// Spawn the worker on a dedicated named thread
    ///
    /// Elevating the thread's scheduler priority is the embedder's job.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("fastmix-worker".to_string())
            .spawn(move || self.run())
    }

    /// The timing controller (diagnostics and tests)
    pub fn timing(&self) -> &TimingController {
        &self.timing
    }

    /// Execute one cycle: poll, interpret the command, do the work, and
    /// decide the next sleep
    pub fn cycle(&mut self) -> CycleResult {
        // poll for state change
        if let Some(next) = self.reader.poll() {
            if !same_snapshot(&next, &self.current) {
                // start using a new dump area as soon as we learn of it
                self.dump = next
                    .dump_state
                    .clone()
                    .unwrap_or_else(|| self.fallback_dump.clone());

                // Keep `previous` pointing at the last non-idle state so the
                // diff on resume is against a real working configuration:
                //   non-idle -> non-idle   previous <- current
                //   non-idle -> idle       pin current; drop timing baseline
                //   idle     -> idle       previous untouched
                //   idle     -> non-idle   previous untouched
                if !self.current.command.is_idle() {
                    if next.command.is_idle() {
                        self.timing.invalidate();
                    }
                    self.previous = self.current.clone();
                }
                self.current = next;
            }
        }

        let command = self.current.command;
        self.dump.set_command(command);

        match command {
            Command::Initial | Command::HotIdle => {
                return CycleResult::Continue(SleepPolicy::Sleep(HOT_IDLE_NS));
            }
            Command::ColdIdle => {
                // acknowledge each cold epoch exactly once
                if self.current.cold_gen != self.cold_gen {
                    if let Some(gate) = &self.current.cold_gate {
                        gate.wait();
                    } else {
                        debug_assert!(false, "cold idle published without a gate");
                    }
                    self.cold_gen = self.current.cold_gen;
                    return CycleResult::Continue(SleepPolicy::BusyWait);
                }
                return CycleResult::Continue(SleepPolicy::Sleep(HOT_IDLE_NS));
            }
            Command::Exit => {
                // hand the engine and buffer to the collector and stop
                self.engine = None;
                self.mix_buffer = None;
                return CycleResult::Exit;
            }
            Command::Mix | Command::Write | Command::MixWrite => {}
        }

        let frame_count = self.current.frame_count;
        if !same_snapshot(&self.current, &self.previous) {
            self.reconcile_state(frame_count);
            // process each state change once
            self.previous = self.current.clone();
        }

        self.run_mix(command);
        self.run_write(command, frame_count);

        let now_ns = self.epoch.elapsed().as_nanos() as u64;
        CycleResult::Continue(self.timing.end_cycle(now_ns, &self.dump))
    }

    /// Apply a state change: sink rebind, engine/buffer rebuild, track diff
    fn reconcile_state(&mut self, frame_count: usize) {
        let previous_format = self.format;

        if self.current.output_sink_gen != self.output_sink_gen {
            self.output_sink = self.current.output_sink.clone();
            self.output_sink_gen = self.current.output_sink_gen;
            match &self.output_sink {
                Some(sink) => {
                    let format = sink.format();
                    assert_eq!(format.channel_count, 2, "fast mixer output must be stereo");
                    self.sample_rate = format.sample_rate;
                    self.format = Some(format);
                }
                None => {
                    self.format = None;
                    self.sample_rate = 0;
                }
            }
        }

        if self.format != previous_format || frame_count != self.previous.frame_count {
            // The engine and buffer are sized for (format, frame count).
            // Retiring the old ones defers their teardown to the collector;
            // the construction below is the one remaining latency hazard on
            // this thread, confined to reconfiguration boundaries.
            // TODO: have a lower-priority helper hand us pre-sized buffers
            self.engine = None;
            self.mix_buffer = None;
            if frame_count > 0 && self.sample_rate > 0 {
                log::info!(
                    "building mix engine: {} frames at {} Hz",
                    frame_count,
                    self.sample_rate
                );
                let engine = (self.engine_factory)(frame_count, self.sample_rate, MAX_FAST_TRACKS);
                self.engine = Some(Owned::new(&self.collector, engine));
                self.mix_buffer = Some(Owned::new(&self.collector, vec![0; frame_count * 2]));
            }
            self.timing.configure(frame_count, self.sample_rate);
            self.mix_buffer_state = MixBufferState::Undefined;
            // every active track must be rebound against the new engine
            self.tracks.force_refresh(self.current.fast_tracks_gen);
            self.diff_tracks(0);
        } else {
            self.diff_tracks(self.previous.track_mask);
        }
    }

    fn diff_tracks(&mut self, previous_mask: u32) {
        if self.tracks.needs_diff(&self.current) {
            let engine = self
                .engine
                .as_mut()
                .map(|e| &mut ***e as &mut dyn MixEngine);
            self.tracks.apply_diff(previous_mask, &self.current, engine);
            self.dump.set_num_tracks(self.current.track_mask.count_ones());
        }
    }

    /// The mix step: push per-cycle volumes, then let the engine fill the
    /// mix buffer
    fn run_mix(&mut self, command: Command) {
        if command.mixes() {
            if let (Some(engine), Some(buffer)) = (self.engine.as_mut(), self.mix_buffer.as_mut())
            {
                let mut volume_tracks = self.current.track_mask;
                while volume_tracks != 0 {
                    let i = volume_tracks.trailing_zeros() as usize;
                    volume_tracks &= volume_tracks - 1;
                    let Some(track) = &self.current.tracks[i] else {
                        debug_assert!(false, "active slot {i} has no track");
                        continue;
                    };
                    if let Some(volume_provider) = &track.volume_provider {
                        if let Some(handle) = self.tracks.handle(i) {
                            let vlr = volume_provider.volume_lr();
                            engine.set_volume(handle, 0, vlr.left());
                            engine.set_volume(handle, 1, vlr.right());
                        }
                    }
                }
                // process() is CPU-bound
                engine.process(buffer.as_mut_slice());
                self.mix_buffer_state = MixBufferState::Mixed;
                return;
            }
        }
        if self.mix_buffer_state == MixBufferState::Mixed {
            // mixed on an earlier cycle; stale now
            self.mix_buffer_state = MixBufferState::Undefined;
        }
    }

    /// The write step: hand one period to the sink, tracking the in-flight
    /// window through the write sequence
    fn run_write(&mut self, command: Command, frame_count: usize) {
        if !command.writes() {
            return;
        }
        let (Some(sink), Some(buffer)) = (&self.output_sink, self.mix_buffer.as_mut()) else {
            return;
        };
        if self.mix_buffer_state == MixBufferState::Undefined {
            // the sink gets silence, never stale samples
            buffer.as_mut_slice().fill(0);
            self.mix_buffer_state = MixBufferState::Zeroed;
        }
        self.dump.begin_write();
        let result = sink.write(&buffer.as_slice()[..frame_count * 2], frame_count);
        self.dump.end_write();
        match result {
            Ok(frames) => self.dump.add_frames_written(frames as u32),
            Err(err) => {
                log::debug!("sink write failed: {}", err);
                self.dump.incr_write_errors();
            }
        }
    }
}

#[inline]
fn same_snapshot(a: &Shared<MixerState>, b: &Shared<MixerState>) -> bool {
    std::ptr::eq(&**a, &**b)
}
