//! Deferred reclamation for the realtime worker
//!
//! The worker is forbidden from freeing memory: a free goes through the
//! allocator's locks and can stall a cycle for longer than a whole period.
//! Everything the worker retires (a superseded state snapshot, an old
//! engine, an old mix buffer) is therefore held in a `basedrop` smart
//! pointer. Dropping one on the worker only pushes a node onto the
//! collector's queue; the nodes are actually freed here, on a sweeper
//! thread where latency is irrelevant.
//!
//! One collector serves the whole process. The thread that first asks for a
//! handle builds the collector, keeps the handle, and moves the collector
//! itself onto the sweeper thread, which owns it from then on and never
//! gives it back.

use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Rest between sweeper passes over the drop queue
///
/// Retired values are at most a few snapshots, an engine, and a buffer;
/// a quarter second of backlog is nothing.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

static SWEEPER: OnceLock<Handle> = OnceLock::new();

/// Allocation handle for `Shared<T>` / `Owned<T>` values
///
/// Cheap to clone. The first call brings up the sweeper thread.
pub fn handle() -> Handle {
    SWEEPER.get_or_init(start_sweeper).clone()
}

fn start_sweeper() -> Handle {
    let mut collector = Collector::new();
    let handle = collector.handle();

    thread::Builder::new()
        .name("fastmix-reclaim".to_string())
        .spawn(move || {
            log::info!("reclaim sweeper running");
            loop {
                collector.collect();
                thread::sleep(SWEEP_INTERVAL);
            }
        })
        .expect("failed to spawn fastmix-reclaim thread");

    handle
}
