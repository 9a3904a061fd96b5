//! Per-device-type payload decoders.
//!
//! Each sensor family has a decoder that turns a data frame's payload into a
//! vector of `f32` values. Decoders are stateless unit types; everything that
//! persists between frames (sample counters, EMG channel layout, last surfaced
//! metrics) lives in a per-device state built from the identity frame and owned
//! by the device's registry record.

pub mod capno6;
pub mod emg;
pub mod go;
pub mod hrv;

use thiserror::Error;

use crate::protocol::{DataType, DeviceType};

pub use capno6::{Capno6Decoder, Capno6State};
pub use emg::{EmgDecoder, EmgState};
pub use go::{GoDecoder, GoState};
pub use hrv::{HrvDecoder, HrvState};

/// Shape of a decoded sample batch written into the caller's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decoded {
    /// Interleaved channels in the batch (1 for everything except EMG)
    pub channels: u16,
    /// Index of the first value within this device's stream of that data type
    pub sequence: u64,
}

impl Decoded {
    pub fn single(sequence: u64) -> Self {
        Decoded {
            channels: 1,
            sequence,
        }
    }
}

/// A payload whose size does not fit its data type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{data_type:?} payload is empty")]
    Empty { data_type: DataType },

    #[error("{data_type:?} payload must be {expected} bytes, got {actual}")]
    WrongSize {
        data_type: DataType,
        expected: usize,
        actual: usize,
    },

    #[error("{data_type:?} payload of {actual} bytes is not a multiple of {unit}")]
    Misaligned {
        data_type: DataType,
        unit: usize,
        actual: usize,
    },
}

/// Decoder for one sensor family.
pub trait PayloadDecoder {
    type State;

    /// Fresh state for a device from its identity payload (`[config, name...]`).
    fn identity(payload: &[u8]) -> Self::State;

    /// Decode one data payload into `out`, which the caller clears beforehand.
    ///
    /// `Ok(None)` means the frame carries nothing to surface: the data type is
    /// withheld or not meaningful for this family.
    fn decode(
        data_type: DataType,
        payload: &[u8],
        state: &mut Self::State,
        out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError>;
}

/// Decoder state of one live device, tagged by family.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceState {
    Go(GoState),
    Hrv(HrvState),
    Emg(EmgState),
    Capno6(Capno6State),
    /// Device type this engine has no decoder for
    Opaque,
}

impl DeviceState {
    pub fn from_identity(device_type: DeviceType, payload: &[u8]) -> Self {
        match device_type {
            DeviceType::CapnoGo => DeviceState::Go(GoDecoder::identity(payload)),
            DeviceType::Hrv => DeviceState::Hrv(HrvDecoder::identity(payload)),
            DeviceType::Emg => DeviceState::Emg(EmgDecoder::identity(payload)),
            DeviceType::Capno6 => DeviceState::Capno6(Capno6Decoder::identity(payload)),
            DeviceType::Unknown => DeviceState::Opaque,
        }
    }

    /// Run the family decoder matching this state.
    pub fn decode(
        &mut self,
        data_type: DataType,
        payload: &[u8],
        out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError> {
        out.clear();
        match self {
            DeviceState::Go(state) => GoDecoder::decode(data_type, payload, state, out),
            DeviceState::Hrv(state) => HrvDecoder::decode(data_type, payload, state, out),
            DeviceState::Emg(state) => EmgDecoder::decode(data_type, payload, state, out),
            DeviceState::Capno6(state) => Capno6Decoder::decode(data_type, payload, state, out),
            DeviceState::Opaque => Ok(None),
        }
    }
}

// ============================================================================
// Payload helpers
// ============================================================================

/// Advance a stream counter by `n` values, returning the index of the first.
pub(crate) fn advance(counter: &mut u64, n: usize) -> u64 {
    let first = *counter;
    *counter = counter.wrapping_add(n as u64);
    first
}

/// Check a payload is a non-empty whole number of `unit`-byte elements.
pub(crate) fn check_elements(data_type: DataType, payload: &[u8], unit: usize) -> Result<(), DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty { data_type });
    }
    if payload.len() % unit != 0 {
        return Err(DecodeError::Misaligned {
            data_type,
            unit,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Check a payload has exactly `expected` bytes.
pub(crate) fn check_size(data_type: DataType, payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() != expected {
        return Err(DecodeError::WrongSize {
            data_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::f32_payload;

    #[test]
    fn test_state_follows_device_type() {
        assert!(matches!(
            DeviceState::from_identity(DeviceType::CapnoGo, &[0]),
            DeviceState::Go(_)
        ));
        assert!(matches!(
            DeviceState::from_identity(DeviceType::Hrv, &[0]),
            DeviceState::Hrv(_)
        ));
        assert!(matches!(
            DeviceState::from_identity(DeviceType::Emg, &[2]),
            DeviceState::Emg(_)
        ));
        assert!(matches!(
            DeviceState::from_identity(DeviceType::Capno6, &[]),
            DeviceState::Capno6(_)
        ));
        assert_eq!(
            DeviceState::from_identity(DeviceType::Unknown, &[]),
            DeviceState::Opaque
        );
    }

    #[test]
    fn test_decode_clears_output_buffer() {
        let mut state = DeviceState::from_identity(DeviceType::CapnoGo, &[0]);
        let mut out = vec![99.0; 10];
        state
            .decode(DataType::Co2, &f32_payload(&[1.0, 2.0]), &mut out)
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_opaque_device_surfaces_nothing() {
        let mut state = DeviceState::Opaque;
        let mut out = Vec::new();
        assert_eq!(state.decode(DataType::Co2, &[0; 4], &mut out), Ok(None));
        assert!(out.is_empty());
    }

    #[test]
    fn test_cross_family_data_is_ignored() {
        let mut hrv = DeviceState::from_identity(DeviceType::Hrv, &[0]);
        let mut out = Vec::new();
        assert_eq!(hrv.decode(DataType::Co2, &[0; 4], &mut out), Ok(None));
    }

    #[test]
    fn test_check_helpers() {
        assert!(check_elements(DataType::Co2, &[0; 8], 4).is_ok());
        assert_eq!(
            check_elements(DataType::Co2, &[], 4),
            Err(DecodeError::Empty {
                data_type: DataType::Co2
            })
        );
        assert!(matches!(
            check_elements(DataType::Co2, &[0; 6], 4),
            Err(DecodeError::Misaligned { unit: 4, actual: 6, .. })
        ));
        assert!(matches!(
            check_size(DataType::CapnoBattery, &[1, 2], 1),
            Err(DecodeError::WrongSize { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_advance_returns_first_index() {
        let mut counter = 10;
        assert_eq!(advance(&mut counter, 3), 10);
        assert_eq!(counter, 13);
    }
}
