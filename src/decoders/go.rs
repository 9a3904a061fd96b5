// src/decoders/go.rs
//
// CapnoTrainer GO: CO2 waveform, battery, status codes and the
// firmware-computed breath averages.

use super::{advance, check_elements, check_size, read_f32_le, DecodeError, Decoded, PayloadDecoder};
use crate::protocol::DataType;

/// Per-device state for a GO unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GoState {
    /// CO2 waveform samples received so far
    pub co2_samples: u64,
    pub battery_percent: Option<u8>,
    /// Status codes from the most recent status frame
    pub status: Vec<u8>,
    pub etco2_average: Option<f32>,
    pub insp_co2_average: Option<f32>,
    pub bpm_average: Option<f32>,
    /// Non-waveform reports received so far (battery, status, averages)
    pub reports: u64,
}

pub struct GoDecoder;

impl PayloadDecoder for GoDecoder {
    type State = GoState;

    fn identity(_payload: &[u8]) -> GoState {
        GoState::default()
    }

    fn decode(
        data_type: DataType,
        payload: &[u8],
        state: &mut GoState,
        out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError> {
        match data_type {
            DataType::Co2 => {
                check_elements(data_type, payload, 4)?;
                out.extend(payload.chunks_exact(4).map(read_f32_le));
                let sequence = advance(&mut state.co2_samples, out.len());
                Ok(Some(Decoded::single(sequence)))
            }
            DataType::CapnoBattery => {
                check_size(data_type, payload, 1)?;
                state.battery_percent = Some(payload[0]);
                out.push(payload[0] as f32);
                Ok(Some(Decoded::single(advance(&mut state.reports, 1))))
            }
            DataType::CapnoStatus => {
                // Codes are opaque; surface every byte so new codes reach the consumer
                check_elements(data_type, payload, 1)?;
                state.status.clear();
                state.status.extend_from_slice(payload);
                out.extend(payload.iter().map(|b| *b as f32));
                Ok(Some(Decoded::single(advance(&mut state.reports, 1))))
            }
            DataType::EtCo2Average | DataType::InspCo2Average | DataType::BpmAverage => {
                check_size(data_type, payload, 4)?;
                let value = read_f32_le(payload);
                match data_type {
                    DataType::EtCo2Average => state.etco2_average = Some(value),
                    DataType::InspCo2Average => state.insp_co2_average = Some(value),
                    _ => state.bpm_average = Some(value),
                }
                out.push(value);
                Ok(Some(Decoded::single(advance(&mut state.reports, 1))))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::f32_payload;

    fn decode(state: &mut GoState, data_type: DataType, payload: &[u8]) -> (Option<Decoded>, Vec<f32>) {
        let mut out = Vec::new();
        let decoded = GoDecoder::decode(data_type, payload, state, &mut out).unwrap();
        (decoded, out)
    }

    #[test]
    fn test_co2_samples_pass_through() {
        let mut state = GoDecoder::identity(&[0]);
        let (decoded, values) = decode(&mut state, DataType::Co2, &f32_payload(&[21.3, 21.5, 21.8]));

        assert_eq!(values, vec![21.3, 21.5, 21.8]);
        assert_eq!(decoded, Some(Decoded::single(0)));
        assert_eq!(state.co2_samples, 3);
    }

    #[test]
    fn test_co2_sequence_continues_across_frames() {
        let mut state = GoState::default();
        decode(&mut state, DataType::Co2, &f32_payload(&[1.0, 2.0]));
        let (decoded, _) = decode(&mut state, DataType::Co2, &f32_payload(&[3.0]));
        assert_eq!(decoded.unwrap().sequence, 2);
    }

    #[test]
    fn test_battery_and_averages_remembered() {
        let mut state = GoState::default();

        let (_, battery) = decode(&mut state, DataType::CapnoBattery, &[87]);
        assert_eq!(battery, vec![87.0]);

        let (_, etco2) = decode(&mut state, DataType::EtCo2Average, &f32_payload(&[38.5]));
        assert_eq!(etco2, vec![38.5]);
        decode(&mut state, DataType::InspCo2Average, &f32_payload(&[0.4]));
        decode(&mut state, DataType::BpmAverage, &f32_payload(&[12.0]));

        assert_eq!(state.battery_percent, Some(87));
        assert_eq!(state.etco2_average, Some(38.5));
        assert_eq!(state.insp_co2_average, Some(0.4));
        assert_eq!(state.bpm_average, Some(12.0));
        assert_eq!(state.reports, 4);
    }

    #[test]
    fn test_status_codes_surface_as_values() {
        let mut state = GoState::default();
        let (decoded, values) = decode(&mut state, DataType::CapnoStatus, &[0x00, 0x07, 0xFE]);
        assert!(decoded.is_some());
        assert_eq!(values, vec![0.0, 7.0, 254.0]);
        assert_eq!(state.status, vec![0x00, 0x07, 0xFE]);
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let mut state = GoState::default();
        let mut out = Vec::new();

        assert!(matches!(
            GoDecoder::decode(DataType::Co2, &[0; 5], &mut state, &mut out),
            Err(DecodeError::Misaligned { .. })
        ));
        assert!(matches!(
            GoDecoder::decode(DataType::Co2, &[], &mut state, &mut out),
            Err(DecodeError::Empty { .. })
        ));
        assert!(matches!(
            GoDecoder::decode(DataType::CapnoBattery, &[50, 51], &mut state, &mut out),
            Err(DecodeError::WrongSize { .. })
        ));
        assert!(matches!(
            GoDecoder::decode(DataType::BpmAverage, &[0; 2], &mut state, &mut out),
            Err(DecodeError::WrongSize { .. })
        ));
        assert_eq!(state, GoState::default());
    }

    #[test]
    fn test_foreign_data_types_ignored() {
        let mut state = GoState::default();
        let (decoded, values) = decode(&mut state, DataType::RrIntervals, &[0, 4]);
        assert_eq!(decoded, None);
        assert!(values.is_empty());

        let (decoded, _) = decode(&mut state, DataType::Unknown(0x42), &[1, 2, 3]);
        assert_eq!(decoded, None);
    }
}
