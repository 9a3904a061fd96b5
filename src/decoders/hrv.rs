// src/decoders/hrv.rs
//
// HRV sensor: beat-to-beat RR intervals. The sensor also reports a heart rate,
// which is kept in state but not dispatched; consumers derive rate from the
// intervals themselves.

use super::{advance, check_elements, check_size, DecodeError, Decoded, PayloadDecoder};
use crate::protocol::DataType;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HrvState {
    /// RR intervals received so far
    pub beats: u64,
    pub last_rr_ms: Option<u16>,
    /// Most recent sensor-reported rate, withheld from dispatch
    pub last_heart_rate: Option<u8>,
}

pub struct HrvDecoder;

impl PayloadDecoder for HrvDecoder {
    type State = HrvState;

    fn identity(_payload: &[u8]) -> HrvState {
        HrvState::default()
    }

    fn decode(
        data_type: DataType,
        payload: &[u8],
        state: &mut HrvState,
        out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError> {
        match data_type {
            DataType::RrIntervals => {
                check_elements(data_type, payload, 2)?;
                let mut last = None;
                for chunk in payload.chunks_exact(2) {
                    let rr = u16::from_le_bytes([chunk[0], chunk[1]]);
                    last = Some(rr);
                    out.push(rr as f32);
                }
                state.last_rr_ms = last;
                Ok(Some(Decoded::single(advance(&mut state.beats, out.len()))))
            }
            DataType::HeartRate => {
                check_size(data_type, payload, 1)?;
                state.last_heart_rate = Some(payload[0]);
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr_intervals_in_milliseconds() {
        let mut state = HrvDecoder::identity(&[0]);
        let mut out = Vec::new();
        // 812 ms, 1024 ms
        let payload = [0x2C, 0x03, 0x00, 0x04];

        let decoded = HrvDecoder::decode(DataType::RrIntervals, &payload, &mut state, &mut out).unwrap();

        assert_eq!(out, vec![812.0, 1024.0]);
        assert_eq!(decoded, Some(Decoded::single(0)));
        assert_eq!(state.beats, 2);
        assert_eq!(state.last_rr_ms, Some(1024));
    }

    #[test]
    fn test_heart_rate_withheld() {
        let mut state = HrvState::default();
        let mut out = Vec::new();
        let decoded = HrvDecoder::decode(DataType::HeartRate, &[72], &mut state, &mut out).unwrap();

        assert_eq!(decoded, None);
        assert!(out.is_empty());
        assert_eq!(state.last_heart_rate, Some(72));
    }

    #[test]
    fn test_odd_length_rr_payload_rejected() {
        let mut state = HrvState::default();
        let mut out = Vec::new();
        let err = HrvDecoder::decode(DataType::RrIntervals, &[1, 2, 3], &mut state, &mut out).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Misaligned {
                data_type: DataType::RrIntervals,
                unit: 2,
                actual: 3
            }
        );
        assert_eq!(state.beats, 0);
    }
}
