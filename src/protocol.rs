// src/protocol.rs
//
// Dongle wire protocol: constants, device and data type codes, and the frame type.
//
// Frame format:
//   [0xA5][device-1byte][handle-1byte][code-1byte][len-1byte][payload-len bytes][crc8-1byte]
//
// The CRC is CRC-8/SMBUS over device..payload (sync byte excluded).
// Code 0xF0 announces a device (identity), 0xF1 reports it gone (disconnect),
// every other code is a data frame carrying that data type.

use std::fmt;

use serde::Serialize;

use crate::checksums::crc8_smbus;
use crate::error::{DongleError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Frame sync byte
pub const SYNC: u8 = 0xA5;
/// sync + device + handle + code + len
pub const HEADER_LEN: usize = 5;
/// Trailing CRC-8
pub const CRC_LEN: usize = 1;
/// Bytes surfaced per serial read
pub const READ_CHUNK_SIZE: usize = 64;
/// Fixed size of a command written to the dongle
pub const COMMAND_SIZE: usize = 16;
/// Largest payload a frame may carry, so a whole frame fits one read unit
pub const MAX_PAYLOAD_LEN: usize = READ_CHUNK_SIZE - HEADER_LEN - CRC_LEN;

/// Frame code: device identity/name announcement
pub const CODE_IDENTITY: u8 = 0xF0;
/// Frame code: device disconnected
pub const CODE_DISCONNECT: u8 = 0xF1;

/// Protocol engine version, queryable without a connection
pub const VERSION: &str = "v1.0.0";

// ============================================================================
// Device Types
// ============================================================================

/// Kind of sensor behind a connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    CapnoGo,
    Emg,
    Hrv,
    Capno6,
    Unknown,
}

impl DeviceType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => DeviceType::CapnoGo,
            0x02 => DeviceType::Emg,
            0x03 => DeviceType::Hrv,
            0x04 => DeviceType::Capno6,
            _ => DeviceType::Unknown,
        }
    }

    /// Wire code, `None` for `Unknown`.
    pub fn code(self) -> Option<u8> {
        match self {
            DeviceType::CapnoGo => Some(0x01),
            DeviceType::Emg => Some(0x02),
            DeviceType::Hrv => Some(0x03),
            DeviceType::Capno6 => Some(0x04),
            DeviceType::Unknown => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::CapnoGo => "CapnoTrainer GO",
            DeviceType::Emg => "EMG",
            DeviceType::Hrv => "HRV",
            DeviceType::Capno6 => "CapnoTrainer 6",
            DeviceType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// Semantic meaning of a data frame's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Co2,
    CapnoBattery,
    CapnoStatus,
    EtCo2Average,
    InspCo2Average,
    BpmAverage,
    Emg,
    RrIntervals,
    HeartRate,
    /// Code this engine does not know yet
    Unknown(u8),
}

impl DataType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => DataType::Co2,
            0x02 => DataType::CapnoBattery,
            0x03 => DataType::CapnoStatus,
            0x04 => DataType::EtCo2Average,
            0x05 => DataType::InspCo2Average,
            0x06 => DataType::BpmAverage,
            0x10 => DataType::Emg,
            0x20 => DataType::RrIntervals,
            0x21 => DataType::HeartRate,
            other => DataType::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DataType::Co2 => 0x01,
            DataType::CapnoBattery => 0x02,
            DataType::CapnoStatus => 0x03,
            DataType::EtCo2Average => 0x04,
            DataType::InspCo2Average => 0x05,
            DataType::BpmAverage => 0x06,
            DataType::Emg => 0x10,
            DataType::RrIntervals => 0x20,
            DataType::HeartRate => 0x21,
            DataType::Unknown(code) => code,
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// What a frame does, decoded from its code byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// A device announced itself on this handle; payload is `[config, name...]`
    Identity,
    /// The device on this handle went away
    Disconnect,
    /// Sensor data of the given type
    Data(DataType),
}

impl FrameKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            CODE_IDENTITY => FrameKind::Identity,
            CODE_DISCONNECT => FrameKind::Disconnect,
            other => FrameKind::Data(DataType::from_code(other)),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FrameKind::Identity => CODE_IDENTITY,
            FrameKind::Disconnect => CODE_DISCONNECT,
            FrameKind::Data(data_type) => data_type.code(),
        }
    }
}

/// One complete protocol frame extracted from a link's byte stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub device_type: DeviceType,
    pub handle: u8,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn identity(device_type: DeviceType, handle: u8, config: u8, name: &str) -> Self {
        let mut payload = Vec::with_capacity(1 + name.len());
        payload.push(config);
        payload.extend_from_slice(name.as_bytes());
        Frame {
            device_type,
            handle,
            kind: FrameKind::Identity,
            payload,
        }
    }

    pub fn disconnect(device_type: DeviceType, handle: u8) -> Self {
        Frame {
            device_type,
            handle,
            kind: FrameKind::Disconnect,
            payload: Vec::new(),
        }
    }

    pub fn data(device_type: DeviceType, handle: u8, data_type: DataType, payload: Vec<u8>) -> Self {
        Frame {
            device_type,
            handle,
            kind: FrameKind::Data(data_type),
            payload,
        }
    }

    /// Encode to wire bytes, rejecting payloads longer than `MAX_PAYLOAD_LEN`.
    pub fn try_encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(DongleError::PayloadTooLong {
                len: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(self.encode())
    }

    /// Encode to wire bytes.
    ///
    /// The payload must fit `MAX_PAYLOAD_LEN` (checked in debug builds; release
    /// builds truncate). An `Unknown` device type is written as code 0x00, which
    /// the assembler rejects.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(
            self.payload.len() <= MAX_PAYLOAD_LEN,
            "payload of {} bytes exceeds {}",
            self.payload.len(),
            MAX_PAYLOAD_LEN
        );
        let len = self.payload.len().min(MAX_PAYLOAD_LEN);
        let mut buf = Vec::with_capacity(HEADER_LEN + len + CRC_LEN);

        buf.push(SYNC);
        buf.push(self.device_type.code().unwrap_or(0x00));
        buf.push(self.handle);
        buf.push(self.kind.code());
        buf.push(len as u8);
        buf.extend_from_slice(&self.payload[..len]);

        let crc = crc8_smbus(&buf[1..]);
        buf.push(crc);
        buf
    }

    /// Total encoded length of this frame.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len().min(MAX_PAYLOAD_LEN) + CRC_LEN
    }
}

/// Pack f32 values little-endian, the layout of float-valued payloads.
pub fn f32_payload(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
