// src/diagnostics.rs
//
// Counters for everything the engine drops or recovers from silently.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Diagnostics {
    frames_decoded: AtomicU64,
    samples_dispatched: AtomicU64,
    unknown_handle_frames: AtomicU64,
    device_mismatch_frames: AtomicU64,
    malformed_payloads: AtomicU64,
    resync_bytes: AtomicU64,
    handle_reuses: AtomicU64,
    sink_dropped: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub frames_decoded: u64,
    pub samples_dispatched: u64,
    pub unknown_handle_frames: u64,
    pub device_mismatch_frames: u64,
    pub malformed_payloads: u64,
    pub resync_bytes: u64,
    pub handle_reuses: u64,
    pub sink_dropped: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample(&self) {
        self.samples_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_handle(&self) {
        self.unknown_handle_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_mismatch(&self) {
        self.device_mismatch_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self, bytes: u64) {
        if bytes > 0 {
            self.resync_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_handle_reuse(&self) {
        self.handle_reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_drop(&self) {
        self.sink_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            samples_dispatched: self.samples_dispatched.load(Ordering::Relaxed),
            unknown_handle_frames: self.unknown_handle_frames.load(Ordering::Relaxed),
            device_mismatch_frames: self.device_mismatch_frames.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            resync_bytes: self.resync_bytes.load(Ordering::Relaxed),
            handle_reuses: self.handle_reuses.load(Ordering::Relaxed),
            sink_dropped: self.sink_dropped.load(Ordering::Relaxed),
        }
    }
}
