//! fastmix-player - drive the fast mixer end to end
//!
//! Wires a controller and a realtime worker together, feeds a couple of
//! sine voices through the built-in fixed-point engine into a null sink,
//! and prints the dump state once per second so the timing behavior is
//! visible.
//!
//! ## Command line flags
//!
//! - `--seconds N`: how long to run before exiting (default 5)

use std::sync::Arc;

use fastmix_core::provider::{FixedVolume, SineProvider};
use fastmix_core::state::state_queue;
use fastmix_core::{DumpState, FastMixer, MixerController, NullSink, VolumeLr};

const SAMPLE_RATE: u32 = 48000;
const FRAME_COUNT: usize = 192; // 4 ms period

fn main() {
    // Initialize logger - set RUST_LOG=debug for per-cycle underrun/overrun lines
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let seconds = args
        .iter()
        .position(|arg| arg == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5);

    log::info!("fastmix-player starting up ({} seconds)", seconds);

    let (writer, reader) = state_queue(16);
    let worker = FastMixer::new(reader)
        .spawn()
        .expect("failed to spawn mixer worker");

    let dump = Arc::new(DumpState::new());
    let sink = Arc::new(NullSink::new(SAMPLE_RATE));
    let volume = Arc::new(FixedVolume::new(VolumeLr::UNITY));

    let mut controller = MixerController::new(writer);
    controller
        .set_dump_state(dump.clone())
        .expect("publish dump state");
    controller
        .set_output_sink(Some(sink.clone()), FRAME_COUNT)
        .expect("publish sink");
    controller
        .set_track(0, Arc::new(SineProvider::new(440.0, SAMPLE_RATE, 8000)), None)
        .expect("publish track 0");
    controller
        .set_track(
            1,
            Arc::new(SineProvider::new(660.0, SAMPLE_RATE, 6000)),
            Some(volume.clone()),
        )
        .expect("publish track 1");
    controller.mix_write().expect("publish mix-write");

    log::info!(
        "mixing 2 tracks, {} frames at {} Hz ({} ms period)",
        FRAME_COUNT,
        SAMPLE_RATE,
        FRAME_COUNT as f32 / SAMPLE_RATE as f32 * 1000.0
    );

    for second in 1..=seconds {
        std::thread::sleep(std::time::Duration::from_secs(1));
        // fade the second voice a little each second
        let gain = (0x1000u32 >> second.min(4)) as u16;
        volume.set(VolumeLr::new(gain, gain));
        log::info!("t={}s {}", second, dump.snapshot());
    }

    controller.exit().expect("publish exit");
    worker.join().expect("worker thread panicked");

    log::info!(
        "done: sink accepted {} frames, final dump: {}",
        sink.frames_accepted(),
        dump.snapshot()
    );
}
