// src/decoders/emg.rs
//
// EMG sensor: signed 16-bit samples interleaved by channel. The channel count
// is announced in the identity frame's config byte.

use super::{advance, check_elements, DecodeError, Decoded, PayloadDecoder};
use crate::protocol::DataType;

#[derive(Clone, Debug, PartialEq)]
pub struct EmgState {
    pub channels: u16,
    /// Channel frames (one sample per channel) received so far
    pub frames: u64,
}

pub struct EmgDecoder;

impl PayloadDecoder for EmgDecoder {
    type State = EmgState;

    fn identity(payload: &[u8]) -> EmgState {
        let channels = payload.first().copied().unwrap_or(0).max(1);
        EmgState {
            channels: channels as u16,
            frames: 0,
        }
    }

    fn decode(
        data_type: DataType,
        payload: &[u8],
        state: &mut EmgState,
        out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError> {
        if data_type != DataType::Emg {
            return Ok(None);
        }

        let frame_size = 2 * state.channels as usize;
        check_elements(data_type, payload, frame_size)?;

        out.extend(
            payload
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32),
        );
        let sequence = advance(&mut state.frames, payload.len() / frame_size);
        Ok(Some(Decoded {
            channels: state.channels,
            sequence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i16_payload(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_channel_count_from_identity() {
        assert_eq!(EmgDecoder::identity(&[2, b'E']).channels, 2);
        assert_eq!(EmgDecoder::identity(&[0]).channels, 1);
        assert_eq!(EmgDecoder::identity(&[]).channels, 1);
    }

    #[test]
    fn test_interleaved_samples() {
        let mut state = EmgDecoder::identity(&[2]);
        let mut out = Vec::new();
        let payload = i16_payload(&[100, -100, 250, -250, 0, 1]);

        let decoded = EmgDecoder::decode(DataType::Emg, &payload, &mut state, &mut out).unwrap();

        assert_eq!(out, vec![100.0, -100.0, 250.0, -250.0, 0.0, 1.0]);
        assert_eq!(
            decoded,
            Some(Decoded {
                channels: 2,
                sequence: 0
            })
        );
        assert_eq!(state.frames, 3);
    }

    #[test]
    fn test_partial_channel_frame_rejected() {
        let mut state = EmgDecoder::identity(&[3]);
        let mut out = Vec::new();
        // Two samples when three channels were announced
        let payload = i16_payload(&[1, 2]);

        let err = EmgDecoder::decode(DataType::Emg, &payload, &mut state, &mut out).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Misaligned {
                data_type: DataType::Emg,
                unit: 6,
                actual: 4
            }
        );
        assert_eq!(state.frames, 0);
    }

    #[test]
    fn test_non_emg_data_ignored() {
        let mut state = EmgDecoder::identity(&[1]);
        let mut out = Vec::new();
        assert_eq!(
            EmgDecoder::decode(DataType::Co2, &[0; 4], &mut state, &mut out),
            Ok(None)
        );
    }
}
