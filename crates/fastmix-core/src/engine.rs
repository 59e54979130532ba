//! Mixing engine interface and the reference fixed-point engine
//!
//! The worker drives the engine through a small handle-based interface: it
//! allocates a handle per live track, binds the track's buffer provider,
//! pushes Q4.12 volume parameters, and calls `process` once per cycle to
//! produce one interleaved stereo buffer. `process` is CPU-bound and must
//! not block.
//!
//! [`FixedPointMixer`] is the in-crate engine: per-track Q4.12 gain into a
//! saturating 32-bit accumulator. All of its buffers are sized at
//! construction, so `process` never allocates.

use std::sync::Arc;

use crate::provider::BufferProvider;
use crate::types::{Sample, VOLUME_UNITY};

/// Opaque per-track handle issued by a mixing engine
///
/// Small integer identity; meaningful only to the engine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHandle(usize);

impl TrackHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// The mixing engine as seen by the worker
///
/// Engines are created through a factory at reconfiguration time (sized for
/// a frame count, sample rate, and track capacity) and torn down whenever
/// the output format changes. Every method is called from the realtime
/// thread and must not block or allocate.
pub trait MixEngine: Send {
    /// Allocate a handle for a new track, or `None` if the engine is at
    /// capacity. Fresh handles default to unity volume and start disabled.
    fn track_handle(&mut self) -> Option<TrackHandle>;

    /// Return a handle to the pool
    fn release_track(&mut self, handle: TrackHandle);

    /// Bind the source of PCM frames for a track
    fn set_buffer_provider(&mut self, handle: TrackHandle, provider: Arc<dyn BufferProvider>);

    /// Set one channel's volume in Q4.12 fixed point (0x1000 = unity);
    /// channel 0 is left, channel 1 is right
    fn set_volume(&mut self, handle: TrackHandle, channel: usize, volume: u16);

    /// Include the track in subsequent `process` calls
    fn enable(&mut self, handle: TrackHandle);

    /// Mix all enabled tracks into `out` (interleaved stereo, one period)
    fn process(&mut self, out: &mut [Sample]);
}

/// Factory the worker uses to build an engine at reconfiguration time
///
/// Arguments: frames per period, sample rate, track capacity.
pub type EngineFactory = Box<dyn FnMut(usize, u32, usize) -> Box<dyn MixEngine> + Send>;

/// One track slot inside [`FixedPointMixer`]
struct EngineTrack {
    in_use: bool,
    enabled: bool,
    provider: Option<Arc<dyn BufferProvider>>,
    /// Q4.12 per-channel gain, [left, right]
    volume: [u16; 2],
}

impl EngineTrack {
    fn vacant() -> Self {
        Self {
            in_use: false,
            enabled: false,
            provider: None,
            volume: [VOLUME_UNITY; 2],
        }
    }
}

/// Q4.12 fixed-point stereo mixer
///
/// Pulls one period of frames from each enabled track's provider into a
/// preallocated scratch buffer, applies per-channel gain, accumulates in
/// i32, and clamps the sum to 16-bit on the way out.
pub struct FixedPointMixer {
    frame_count: usize,
    tracks: Vec<EngineTrack>,
    /// Per-track pull buffer, `frame_count * 2` samples
    scratch: Vec<Sample>,
    /// Saturating accumulator, `frame_count * 2` samples
    accum: Vec<i32>,
}

impl FixedPointMixer {
    pub fn new(frame_count: usize, _sample_rate: u32, max_tracks: usize) -> Self {
        Self {
            frame_count,
            tracks: (0..max_tracks).map(|_| EngineTrack::vacant()).collect(),
            scratch: vec![0; frame_count * 2],
            accum: vec![0; frame_count * 2],
        }
    }

    /// The boxed factory for this engine, in the shape the worker expects
    pub fn factory() -> EngineFactory {
        Box::new(|frame_count, sample_rate, max_tracks| {
            Box::new(FixedPointMixer::new(frame_count, sample_rate, max_tracks))
        })
    }

    fn track_mut(&mut self, handle: TrackHandle) -> Option<&mut EngineTrack> {
        self.tracks.get_mut(handle.index()).filter(|t| t.in_use)
    }
}

impl MixEngine for FixedPointMixer {
    fn track_handle(&mut self) -> Option<TrackHandle> {
        let index = self.tracks.iter().position(|t| !t.in_use)?;
        self.tracks[index] = EngineTrack {
            in_use: true,
            ..EngineTrack::vacant()
        };
        Some(TrackHandle::new(index))
    }

    fn release_track(&mut self, handle: TrackHandle) {
        if let Some(track) = self.tracks.get_mut(handle.index()) {
            *track = EngineTrack::vacant();
        }
    }

    fn set_buffer_provider(&mut self, handle: TrackHandle, provider: Arc<dyn BufferProvider>) {
        if let Some(track) = self.track_mut(handle) {
            track.provider = Some(provider);
        }
    }

    fn set_volume(&mut self, handle: TrackHandle, channel: usize, volume: u16) {
        debug_assert!(channel < 2);
        if let Some(track) = self.track_mut(handle) {
            if let Some(v) = track.volume.get_mut(channel) {
                *v = volume;
            }
        }
    }

    fn enable(&mut self, handle: TrackHandle) {
        if let Some(track) = self.track_mut(handle) {
            track.enabled = true;
        }
    }

    fn process(&mut self, out: &mut [Sample]) {
        let samples = self.frame_count * 2;
        debug_assert!(out.len() >= samples);
        self.accum[..samples].fill(0);

        for track in &self.tracks {
            if !track.in_use || !track.enabled {
                continue;
            }
            let Some(provider) = &track.provider else {
                continue;
            };
            self.scratch[..samples].fill(0);
            provider.fill(&mut self.scratch[..samples]);

            let gain_l = track.volume[0] as i32;
            let gain_r = track.volume[1] as i32;
            for (acc, frame) in self.accum[..samples]
                .chunks_exact_mut(2)
                .zip(self.scratch[..samples].chunks_exact(2))
            {
                acc[0] += (frame[0] as i32 * gain_l) >> 12;
                acc[1] += (frame[1] as i32 * gain_r) >> 12;
            }
        }

        for (dst, &acc) in out[..samples].iter_mut().zip(self.accum[..samples].iter()) {
            *dst = acc.clamp(Sample::MIN as i32, Sample::MAX as i32) as Sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ConstantProvider;

    fn engine(frames: usize, tracks: usize) -> FixedPointMixer {
        FixedPointMixer::new(frames, 48000, tracks)
    }

    fn add_constant_track(e: &mut FixedPointMixer, value: Sample) -> TrackHandle {
        let h = e.track_handle().expect("capacity");
        e.set_buffer_provider(h, Arc::new(ConstantProvider::new(value)));
        e.enable(h);
        h
    }

    #[test]
    fn test_unity_volume_passes_through() {
        let mut e = engine(4, 2);
        add_constant_track(&mut e, 1000);
        let mut out = [0i16; 8];
        e.process(&mut out);
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_half_volume_halves_samples() {
        let mut e = engine(4, 2);
        let h = add_constant_track(&mut e, 1000);
        e.set_volume(h, 0, 0x0800);
        e.set_volume(h, 1, 0x0800);
        let mut out = [0i16; 8];
        e.process(&mut out);
        assert!(out.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_per_channel_volume() {
        let mut e = engine(2, 1);
        let h = add_constant_track(&mut e, 1000);
        e.set_volume(h, 0, 0x0800);
        // right stays unity
        let mut out = [0i16; 4];
        e.process(&mut out);
        assert_eq!(out, [500, 1000, 500, 1000]);
    }

    #[test]
    fn test_tracks_accumulate() {
        let mut e = engine(2, 4);
        add_constant_track(&mut e, 300);
        add_constant_track(&mut e, 200);
        let mut out = [0i16; 4];
        e.process(&mut out);
        assert!(out.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_accumulation_saturates() {
        let mut e = engine(2, 4);
        add_constant_track(&mut e, i16::MAX);
        add_constant_track(&mut e, i16::MAX);
        let mut out = [0i16; 4];
        e.process(&mut out);
        // 0x1000 gain loses nothing, the sum clamps at full scale
        assert!(out.iter().all(|&s| s >= i16::MAX - 2));
    }

    #[test]
    fn test_disabled_track_is_silent() {
        let mut e = engine(2, 2);
        let h = e.track_handle().unwrap();
        e.set_buffer_provider(h, Arc::new(ConstantProvider::new(1000)));
        // never enabled
        let mut out = [7i16; 4];
        e.process(&mut out);
        assert!(out.iter().all(|&s| s == 0));
        let _ = h;
    }

    #[test]
    fn test_handle_pool_exhaustion_and_reuse() {
        let mut e = engine(2, 2);
        let a = e.track_handle().unwrap();
        let _b = e.track_handle().unwrap();
        assert!(e.track_handle().is_none());
        e.release_track(a);
        assert!(e.track_handle().is_some());
    }

    #[test]
    fn test_fresh_handle_defaults_to_unity() {
        let mut e = engine(2, 2);
        let h = e.track_handle().unwrap();
        e.set_volume(h, 0, 0x0400);
        e.release_track(h);
        // Reallocated slot must come back at unity, not 0x0400
        let h2 = e.track_handle().unwrap();
        assert_eq!(h2.index(), h.index());
        e.set_buffer_provider(h2, Arc::new(ConstantProvider::new(1000)));
        e.enable(h2);
        let mut out = [0i16; 4];
        e.process(&mut out);
        assert!(out.iter().all(|&s| s == 1000));
    }
}
