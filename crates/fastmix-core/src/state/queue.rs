//! Single-producer single-consumer snapshot publication
//!
//! The controller publishes immutable [`MixerState`] snapshots; the realtime
//! worker polls for the newest one. The consumer side is wait-free: `poll`
//! never blocks, locks, or allocates. Snapshots travel as
//! `basedrop::Shared` handles through a fixed-capacity SPSC ring, so
//!
//! - the worker can retain any snapshot (its `current`, its pinned pre-idle
//!   state) for as long as it needs by simply holding the handle, and
//! - dropping a superseded handle on the worker never frees memory; the
//!   sweeper thread reclaims it later (see the `reclaim` module).
//!
//! The producer side may fail with [`StateQueueFull`] when more snapshots
//! are in flight than the ring holds; the controller is low-priority and is
//! expected to wake the worker and retry.

use basedrop::{Handle, Shared};
use thiserror::Error;

use crate::reclaim;
use crate::state::snapshot::MixerState;

/// Default number of in-flight snapshots the queue can hold
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// The queue cannot accept another snapshot until the worker drains
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("state queue full, worker has not drained")]
pub struct StateQueueFull;

/// Create a connected publisher/poller pair
pub fn state_queue(capacity: usize) -> (StateWriter, StateReader) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (
        StateWriter {
            producer,
            handle: reclaim::handle(),
        },
        StateReader { consumer },
    )
}

/// Producer side, owned by the controller
pub struct StateWriter {
    producer: rtrb::Producer<Shared<MixerState>>,
    handle: Handle,
}

impl StateWriter {
    /// Publish a snapshot (non-blocking)
    ///
    /// The state is frozen into a `Shared` handle; nothing mutates it after
    /// this call returns.
    pub fn publish(&mut self, state: MixerState) -> Result<(), StateQueueFull> {
        let snapshot = Shared::new(&self.handle, state);
        self.producer.push(snapshot).map_err(|_| StateQueueFull)
    }

    /// Free slots remaining in the ring
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer side, owned by the realtime worker
pub struct StateReader {
    consumer: rtrb::Consumer<Shared<MixerState>>,
}

impl StateReader {
    /// Return the newest published snapshot, or `None` if nothing new
    /// arrived since the last poll
    ///
    /// Wait-free: pops are O(1) and superseded handles are dropped without
    /// deallocating (deferred to the collector thread).
    pub fn poll(&mut self) -> Option<Shared<MixerState>> {
        let mut newest = None;
        while let Ok(snapshot) = self.consumer.pop() {
            newest = Some(snapshot);
        }
        newest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::snapshot::Command;

    fn state_with_gen(fast_tracks_gen: u32) -> MixerState {
        MixerState {
            fast_tracks_gen,
            ..MixerState::initial()
        }
    }

    #[test]
    fn test_poll_empty_returns_none() {
        let (_writer, mut reader) = state_queue(4);
        assert!(reader.poll().is_none());
    }

    #[test]
    fn test_poll_returns_newest() {
        let (mut writer, mut reader) = state_queue(8);
        writer.publish(state_with_gen(1)).unwrap();
        writer.publish(state_with_gen(2)).unwrap();
        writer.publish(state_with_gen(3)).unwrap();

        let newest = reader.poll().expect("a snapshot was published");
        assert_eq!(newest.fast_tracks_gen, 3);
        // Everything was drained; nothing is observed twice
        assert!(reader.poll().is_none());
    }

    #[test]
    fn test_publications_observed_in_order() {
        let (mut writer, mut reader) = state_queue(8);
        for gen in 1..=5 {
            writer.publish(state_with_gen(gen)).unwrap();
            let seen = reader.poll().expect("published");
            assert_eq!(seen.fast_tracks_gen, gen);
        }
    }

    #[test]
    fn test_full_queue_reports_error() {
        let (mut writer, _reader) = state_queue(2);
        writer.publish(state_with_gen(1)).unwrap();
        writer.publish(state_with_gen(2)).unwrap();
        assert_eq!(writer.publish(state_with_gen(3)), Err(StateQueueFull));
    }

    #[test]
    fn test_retained_handle_outlives_queue_reuse() {
        let (mut writer, mut reader) = state_queue(2);
        writer.publish(state_with_gen(1)).unwrap();
        let pinned = reader.poll().unwrap();

        // The ring slots recycle many times over; the pinned handle must
        // still read back its original contents
        for gen in 2..20 {
            writer.publish(state_with_gen(gen)).unwrap();
            let _ = reader.poll();
        }
        assert_eq!(pinned.fast_tracks_gen, 1);
        assert_eq!(pinned.command, Command::Initial);
    }
}
