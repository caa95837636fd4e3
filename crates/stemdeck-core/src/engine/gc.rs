//! RT-safe garbage collection for decoded track buffers
//!
//! Decoded stems are wrapped in `basedrop::Shared<LoadedBuffer>`. When the
//! render thread drops the last reference (a voice finishing, a seek
//! replacing the voice set) the pointer is only enqueued; the actual free of
//! a multi-megabyte buffer happens on the `audio-gc` thread.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let buffer = Shared::new(&gc_handle(), loaded);
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Collection interval of the GC thread
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it is created on the thread that runs it
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    if let Err(e) = spawned {
        log::error!("Failed to spawn audio GC thread: {}", e);
    }

    match rx.recv() {
        Ok(handle) => handle,
        Err(_) => {
            // No GC thread: deferred drops are never reclaimed
            log::error!("Audio GC unavailable, falling back to a leaked collector");
            let collector = Collector::new();
            let handle = collector.handle();
            std::mem::forget(collector);
            handle
        }
    }
}

/// Handle for creating `Shared<T>` allocations (cheap to clone)
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
