// src/io/serial/framer.rs
//
// Reassembles dongle frames from a serial byte stream.
//
// Reads return whatever the driver has buffered, so frames routinely straddle
// two reads. Bytes are kept across feed() calls and only complete, CRC-valid
// frames are returned.
//
// Resynchronisation: anything before a sync byte is dropped. A candidate whose
// device code is unknown, whose length is out of range, or whose CRC fails is
// rejected by dropping only its sync byte and rescanning, so a valid frame that
// follows a corrupt one is never consumed by the rejected candidate.

use thiserror::Error;

use crate::checksums::crc8_smbus;
use crate::protocol::{DeviceType, Frame, FrameKind, CRC_LEN, HEADER_LEN, MAX_PAYLOAD_LEN, SYNC};

/// Why a candidate frame was rejected. Never leaves this module.
#[derive(Debug, Error, PartialEq, Eq)]
enum ProtocolDesync {
    #[error("unknown device code {0:#04x}")]
    UnknownDevice(u8),
    #[error("payload length {0} exceeds the maximum")]
    PayloadTooLong(usize),
    #[error("crc mismatch: calculated {calculated:#04x}, received {received:#04x}")]
    BadCrc { calculated: u8, received: u8 },
}

/// Running totals for one assembler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Complete frames produced
    pub frames: u64,
    /// Bytes thrown away while hunting for a valid frame
    pub discarded_bytes: u64,
    /// Candidate headers rejected after a sync byte was found
    pub rejected_candidates: u64,
}

/// Stateful frame assembler for one link.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buffer: Vec::with_capacity(2 * (HEADER_LEN + MAX_PAYLOAD_LEN + CRC_LEN)),
            stats: AssemblerStats::default(),
        }
    }

    /// Feed raw bytes into the assembler.
    /// Returns every frame completed by these bytes, in stream order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let pos = match self.buffer.iter().position(|b| *b == SYNC) {
                Some(i) => i,
                None => {
                    self.discard(self.buffer.len());
                    break;
                }
            };
            if pos > 0 {
                self.discard(pos);
            }

            match self.try_extract() {
                Ok(Some((frame, len))) => {
                    self.buffer.drain(..len);
                    self.stats.frames += 1;
                    frames.push(frame);
                }
                Ok(None) => break,
                Err(_reason) => {
                    self.stats.rejected_candidates += 1;
                    self.discard(1);
                }
            }
        }

        frames
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Drop any partial frame, e.g. when the link is reopened.
    pub fn reset(&mut self) {
        let pending = self.buffer.len();
        self.discard(pending);
    }

    fn discard(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.stats.discarded_bytes += n as u64;
    }

    /// Check the candidate at the start of the buffer (which begins with SYNC).
    ///
    /// Header fields are checked as soon as they arrive so a bad candidate is
    /// rejected without waiting for bytes it claims to own. `Ok(None)` means the
    /// candidate is plausible so far and needs more bytes.
    fn try_extract(&self) -> Result<Option<(Frame, usize)>, ProtocolDesync> {
        let buf = &self.buffer;

        if buf.len() < 2 {
            return Ok(None);
        }
        let device_type = DeviceType::from_code(buf[1]);
        if device_type == DeviceType::Unknown {
            return Err(ProtocolDesync::UnknownDevice(buf[1]));
        }

        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let payload_len = buf[4] as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolDesync::PayloadTooLong(payload_len));
        }

        let total_len = HEADER_LEN + payload_len + CRC_LEN;
        if buf.len() < total_len {
            return Ok(None);
        }

        let calculated = crc8_smbus(&buf[1..total_len - CRC_LEN]);
        let received = buf[total_len - CRC_LEN];
        if calculated != received {
            return Err(ProtocolDesync::BadCrc {
                calculated,
                received,
            });
        }

        let frame = Frame {
            device_type,
            handle: buf[2],
            kind: FrameKind::from_code(buf[3]),
            payload: buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
        };
        Ok(Some((frame, total_len)))
    }
}
