//! State handoff between the controller and the realtime worker

pub mod cold;
pub mod queue;
pub mod snapshot;

pub use cold::ColdGate;
pub use queue::{state_queue, StateQueueFull, StateReader, StateWriter, DEFAULT_QUEUE_CAPACITY};
pub use snapshot::{Command, FastTrack, MixerState};
