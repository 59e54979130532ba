//! Track lifecycle bookkeeping for the worker
//!
//! The worker keeps, per slot, the engine handle it holds for that slot and
//! the last track generation it applied. When a snapshot arrives with a new
//! table generation, [`TrackTable::apply_diff`] reconciles the engine with
//! the new table in three disjoint passes over the mask bits:
//! removed, then added, then modified. Removals run first so that swapping
//! one track for another while the table is at capacity never runs the
//! engine out of handles.

use crate::engine::{MixEngine, TrackHandle};
use crate::state::snapshot::MixerState;
use crate::types::{MAX_FAST_TRACKS, VOLUME_UNITY};

/// Per-slot handle and generation bookkeeping, plus the applied table
/// generation
#[derive(Debug)]
pub struct TrackTable {
    handles: [Option<TrackHandle>; MAX_FAST_TRACKS],
    generations: [u32; MAX_FAST_TRACKS],
    table_gen: u32,
}

impl TrackTable {
    pub fn new() -> Self {
        Self {
            handles: [None; MAX_FAST_TRACKS],
            generations: [0; MAX_FAST_TRACKS],
            table_gen: 0,
        }
    }

    /// The engine handle held for a slot, if any
    pub fn handle(&self, slot: usize) -> Option<TrackHandle> {
        self.handles.get(slot).copied().flatten()
    }

    /// The last table generation applied to the engine
    pub fn table_gen(&self) -> u32 {
        self.table_gen
    }

    /// True when the snapshot's table generation has moved past ours
    pub fn needs_diff(&self, state: &MixerState) -> bool {
        state.fast_tracks_gen != self.table_gen
    }

    /// Forget all engine handles (the engine they belonged to is gone)
    pub fn reset_handles(&mut self) {
        self.handles = [None; MAX_FAST_TRACKS];
    }

    /// Force the next diff to treat every active track as newly added
    ///
    /// Used after the engine is rebuilt: backdating our generation by one
    /// guarantees `needs_diff`, and the caller diffs against an empty
    /// previous mask.
    pub fn force_refresh(&mut self, current_gen: u32) {
        self.reset_handles();
        self.table_gen = current_gen.wrapping_sub(1);
    }

    /// Reconcile the engine's active set with the snapshot's track table
    ///
    /// `previous_mask` is the active set the engine currently reflects.
    /// Bookkeeping proceeds even without an engine so generations stay
    /// current; engine calls resume once one exists again.
    pub fn apply_diff(
        &mut self,
        previous_mask: u32,
        state: &MixerState,
        mut engine: Option<&mut dyn MixEngine>,
    ) {
        let current_mask = state.track_mask;

        // Removed first: a swap at capacity must free its handle before the
        // add pass asks for a new one
        let mut removed = previous_mask & !current_mask;
        while removed != 0 {
            let i = removed.trailing_zeros() as usize;
            removed &= removed - 1;
            if let Some(handle) = self.handles[i].take() {
                if let Some(engine) = engine.as_mut() {
                    engine.release_track(handle);
                }
            }
            if let Some(track) = &state.tracks[i] {
                self.generations[i] = track.generation;
            }
        }

        let mut added = current_mask & !previous_mask;
        while added != 0 {
            let i = added.trailing_zeros() as usize;
            added &= added - 1;
            let Some(track) = &state.tracks[i] else {
                debug_assert!(false, "active slot {i} has no track");
                continue;
            };
            debug_assert!(self.handles[i].is_none());
            if let Some(engine) = engine.as_mut() {
                match engine.track_handle() {
                    Some(handle) => {
                        engine.set_buffer_provider(handle, track.buffer_provider.clone());
                        // fresh handles default to full-scale volume
                        engine.enable(handle);
                        self.handles[i] = Some(handle);
                    }
                    None => {
                        log::error!("mix engine out of track handles for slot {}", i);
                    }
                }
            }
            self.generations[i] = track.generation;
        }

        // Modified: same slot, but the controller bumped its generation, so
        // the providers may have changed
        let mut modified = current_mask & previous_mask;
        while modified != 0 {
            let i = modified.trailing_zeros() as usize;
            modified &= modified - 1;
            let Some(track) = &state.tracks[i] else {
                debug_assert!(false, "active slot {i} has no track");
                continue;
            };
            if track.generation == self.generations[i] {
                continue;
            }
            if let Some(engine) = engine.as_mut() {
                if let Some(handle) = self.handles[i] {
                    engine.set_buffer_provider(handle, track.buffer_provider.clone());
                    if track.volume_provider.is_none() {
                        engine.set_volume(handle, 0, VOLUME_UNITY);
                        engine.set_volume(handle, 1, VOLUME_UNITY);
                    }
                    // already enabled
                }
            }
            self.generations[i] = track.generation;
        }

        self.table_gen = state.fast_tracks_gen;
    }
}

impl Default for TrackTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BufferProvider, FixedVolume, SilenceProvider};
    use crate::state::snapshot::FastTrack;
    use crate::types::VolumeLr;
    use std::sync::Arc;

    /// Records every engine call so tests can assert exact order
    #[derive(Default)]
    struct RecordingEngine {
        next_handle: usize,
        ops: Vec<Op>,
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Alloc(usize),
        Release(usize),
        SetProvider(usize),
        SetVolume(usize, usize, u16),
        Enable(usize),
    }

    impl MixEngine for RecordingEngine {
        fn track_handle(&mut self) -> Option<TrackHandle> {
            let h = self.next_handle;
            self.next_handle += 1;
            self.ops.push(Op::Alloc(h));
            Some(TrackHandle::new(h))
        }

        fn release_track(&mut self, handle: TrackHandle) {
            self.ops.push(Op::Release(handle.index()));
        }

        fn set_buffer_provider(
            &mut self,
            handle: TrackHandle,
            _provider: Arc<dyn BufferProvider>,
        ) {
            self.ops.push(Op::SetProvider(handle.index()));
        }

        fn set_volume(&mut self, handle: TrackHandle, channel: usize, volume: u16) {
            self.ops.push(Op::SetVolume(handle.index(), channel, volume));
        }

        fn enable(&mut self, handle: TrackHandle) {
            self.ops.push(Op::Enable(handle.index()));
        }

        fn process(&mut self, _out: &mut [i16]) {}
    }

    fn track(generation: u32, with_volume: bool) -> FastTrack {
        FastTrack {
            buffer_provider: Arc::new(SilenceProvider),
            volume_provider: if with_volume {
                Some(Arc::new(FixedVolume::new(VolumeLr::UNITY)))
            } else {
                None
            },
            generation,
        }
    }

    fn state_with(mask: u32, gen: u32, tracks: &[(usize, FastTrack)]) -> MixerState {
        let mut s = MixerState::initial();
        s.track_mask = mask;
        s.fast_tracks_gen = gen;
        for (slot, t) in tracks {
            s.tracks[*slot] = Some(t.clone());
        }
        s
    }

    #[test]
    fn test_add_then_remove_order_in_one_diff() {
        let mut table = TrackTable::new();
        let mut engine = RecordingEngine::default();

        // Slots 0 and 1 active
        let s1 = state_with(0b0011, 1, &[(0, track(1, false)), (1, track(2, false))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        engine.ops.clear();

        // Slot 0 leaves, slot 2 arrives, slot 1 stays
        let s2 = state_with(0b0110, 2, &[(1, track(2, false)), (2, track(3, false))]);
        table.apply_diff(0b0011, &s2, Some(&mut engine));

        assert_eq!(
            engine.ops,
            vec![
                Op::Release(0),
                Op::Alloc(2),
                Op::SetProvider(2),
                Op::Enable(2),
            ]
        );
        assert!(table.handle(0).is_none());
        assert_eq!(table.handle(1).map(TrackHandle::index), Some(1));
        assert_eq!(table.handle(2).map(TrackHandle::index), Some(2));
    }

    #[test]
    fn test_unchanged_generation_is_untouched() {
        let mut table = TrackTable::new();
        let mut engine = RecordingEngine::default();

        let s1 = state_with(0b1, 1, &[(0, track(5, true))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        engine.ops.clear();

        // Table generation moved (another slot changed elsewhere), but slot
        // 0's own generation did not: no engine traffic for it
        let s2 = state_with(0b1, 2, &[(0, track(5, true))]);
        table.apply_diff(0b1, &s2, Some(&mut engine));
        assert!(engine.ops.is_empty());
        assert_eq!(table.table_gen(), 2);
    }

    #[test]
    fn test_modified_without_volume_provider_resets_to_unity() {
        let mut table = TrackTable::new();
        let mut engine = RecordingEngine::default();

        let s1 = state_with(0b1, 1, &[(0, track(1, true))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        engine.ops.clear();

        let s2 = state_with(0b1, 2, &[(0, track(2, false))]);
        table.apply_diff(0b1, &s2, Some(&mut engine));
        assert_eq!(
            engine.ops,
            vec![
                Op::SetProvider(0),
                Op::SetVolume(0, 0, VOLUME_UNITY),
                Op::SetVolume(0, 1, VOLUME_UNITY),
            ]
        );
    }

    #[test]
    fn test_modified_with_volume_provider_keeps_engine_volume() {
        let mut table = TrackTable::new();
        let mut engine = RecordingEngine::default();

        let s1 = state_with(0b1, 1, &[(0, track(1, true))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        engine.ops.clear();

        let s2 = state_with(0b1, 2, &[(0, track(2, true))]);
        table.apply_diff(0b1, &s2, Some(&mut engine));
        // Volume comes from the provider each mix cycle, not from the diff
        assert_eq!(engine.ops, vec![Op::SetProvider(0)]);
    }

    #[test]
    fn test_bookkeeping_without_engine() {
        let mut table = TrackTable::new();
        let s1 = state_with(0b11, 1, &[(0, track(1, false)), (1, track(2, false))]);
        table.apply_diff(0, &s1, None);
        assert_eq!(table.table_gen(), 1);
        assert!(table.handle(0).is_none());
        assert!(table.handle(1).is_none());
    }

    #[test]
    fn test_force_refresh_backdates_generation() {
        let mut table = TrackTable::new();
        let mut engine = RecordingEngine::default();
        let s1 = state_with(0b1, 7, &[(0, track(1, false))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        assert!(!table.needs_diff(&s1));

        table.force_refresh(s1.fast_tracks_gen);
        assert!(table.needs_diff(&s1));
        assert!(table.handle(0).is_none());

        // Diff against an empty previous mask re-adds the active track
        engine.ops.clear();
        table.apply_diff(0, &s1, Some(&mut engine));
        assert_eq!(
            engine.ops,
            vec![Op::Alloc(1), Op::SetProvider(1), Op::Enable(1)]
        );
    }

    /// Recording engine with a hard handle budget, never recycling indices
    struct CappedEngine {
        inner: RecordingEngine,
        live: usize,
        capacity: usize,
    }

    impl MixEngine for CappedEngine {
        fn track_handle(&mut self) -> Option<TrackHandle> {
            if self.live == self.capacity {
                return None;
            }
            self.live += 1;
            self.inner.track_handle()
        }

        fn release_track(&mut self, handle: TrackHandle) {
            self.live -= 1;
            self.inner.release_track(handle);
        }

        fn set_buffer_provider(&mut self, handle: TrackHandle, provider: Arc<dyn BufferProvider>) {
            self.inner.set_buffer_provider(handle, provider);
        }

        fn set_volume(&mut self, handle: TrackHandle, channel: usize, volume: u16) {
            self.inner.set_volume(handle, channel, volume);
        }

        fn enable(&mut self, handle: TrackHandle) {
            self.inner.enable(handle);
        }

        fn process(&mut self, _out: &mut [i16]) {}
    }

    #[test]
    fn test_swap_at_capacity_releases_before_alloc() {
        // Engine holds exactly two handles; swapping one active slot for
        // another must not fail, which it would if adds ran first
        let mut table = TrackTable::new();
        let mut engine = CappedEngine {
            inner: RecordingEngine::default(),
            live: 0,
            capacity: 2,
        };

        let s1 = state_with(0b011, 1, &[(0, track(1, false)), (1, track(2, false))]);
        table.apply_diff(0, &s1, Some(&mut engine));
        engine.inner.ops.clear();

        // Slot 1 out, slot 2 in
        let s2 = state_with(0b101, 2, &[(0, track(1, false)), (2, track(3, false))]);
        table.apply_diff(0b011, &s2, Some(&mut engine));
        assert_eq!(
            engine.inner.ops,
            vec![
                Op::Release(1),
                Op::Alloc(2),
                Op::SetProvider(2),
                Op::Enable(2),
            ]
        );
        assert!(table.handle(2).is_some());
    }
}
