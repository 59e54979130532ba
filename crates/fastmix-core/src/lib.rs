//! fastmix-core - realtime audio mixing loop with lock-free state handoff
//!
//! A dedicated worker thread produces one buffer of interleaved stereo PCM
//! per device period with sub-millisecond jitter, for latency-critical audio
//! paths that cannot wait on the normal mixer pipeline. A lower-priority
//! controller reconfigures the worker exclusively through immutable state
//! snapshots published over a wait-free queue; the worker's hot loop never
//! takes a lock, never allocates, and blocks only where the design says it
//! may (its own sleep, the cold-idle gate, the non-blocking sink write).
//!
//! ```no_run
//! use std::sync::Arc;
//! use fastmix_core::controller::MixerController;
//! use fastmix_core::provider::SineProvider;
//! use fastmix_core::sink::NullSink;
//! use fastmix_core::state::state_queue;
//! use fastmix_core::worker::FastMixer;
//!
//! let (writer, reader) = state_queue(16);
//! let worker = FastMixer::new(reader).spawn().unwrap();
//!
//! let mut controller = MixerController::new(writer);
//! controller.set_output_sink(Some(Arc::new(NullSink::new(48000))), 192).unwrap();
//! controller.set_track(0, Arc::new(SineProvider::new(440.0, 48000, 8000)), None).unwrap();
//! controller.mix_write().unwrap();
//! // ... later
//! controller.exit().unwrap();
//! worker.join().unwrap();
//! ```

pub mod controller;
pub mod engine;
pub mod provider;
pub mod reclaim;
pub mod sink;
pub mod state;
pub mod types;
pub mod worker;

pub use controller::{ControllerError, MixerController};
pub use engine::{EngineFactory, FixedPointMixer, MixEngine, TrackHandle};
pub use sink::{NullSink, OutputSink, SinkError, SinkFormat};
pub use state::{state_queue, ColdGate, Command, FastTrack, MixerState, StateReader, StateWriter};
pub use types::{Sample, VolumeLr, HOT_IDLE_NS, MAX_FAST_TRACKS, VOLUME_UNITY};
pub use worker::dump::{DumpSnapshot, DumpState, JitterStats};
pub use worker::timing::{SleepPolicy, TimingController};
pub use worker::{CycleResult, FastMixer};
