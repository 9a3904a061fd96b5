// src/decoders/capno6.rs
//
// CapnoTrainer 6 units are registered so their handles route commands, but
// their data is not decoded.

use super::{DecodeError, Decoded, PayloadDecoder};
use crate::protocol::DataType;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capno6State {
    pub frames_ignored: u64,
}

pub struct Capno6Decoder;

impl PayloadDecoder for Capno6Decoder {
    type State = Capno6State;

    fn identity(_payload: &[u8]) -> Capno6State {
        Capno6State::default()
    }

    fn decode(
        _data_type: DataType,
        _payload: &[u8],
        state: &mut Capno6State,
        _out: &mut Vec<f32>,
    ) -> Result<Option<Decoded>, DecodeError> {
        state.frames_ignored += 1;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capno6_data_never_surfaces() {
        let mut state = Capno6Decoder::identity(&[]);
        let mut out = Vec::new();
        for data_type in [DataType::Co2, DataType::CapnoBattery, DataType::Unknown(0x30)] {
            assert_eq!(Capno6Decoder::decode(data_type, &[0; 4], &mut state, &mut out), Ok(None));
        }
        assert!(out.is_empty());
        assert_eq!(state.frames_ignored, 3);
    }
}
