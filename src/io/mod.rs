// src/io/mod.rs
//
// Physical transport for the dongle: serial links, framing, and port discovery.
// The dongle exposes up to two serial links; each one is identified by a LinkId
// and carries its own independent stream of frames and connection handles.

pub mod serial;

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use serial::{
    find_ports_by_usb_id, list_serial_ports, AssemblerStats, DonglePortInfo, FrameAssembler,
    Link, LinkControl,
};

// ============================================================================
// Shared Types
// ============================================================================

/// Which of the dongle's serial links something belongs to.
///
/// Connection handles are only unique per link, so every handle lookup is
/// scoped by (LinkId, handle).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LinkId {
    A,
    B,
}

impl LinkId {
    pub const ALL: [LinkId; 2] = [LinkId::A, LinkId::B];

    pub fn index(self) -> usize {
        match self {
            LinkId::A => 0,
            LinkId::B => 1,
        }
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkId::A => f.write_str("A"),
            LinkId::B => f.write_str("B"),
        }
    }
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
