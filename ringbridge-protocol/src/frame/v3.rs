use crate::error::{ProtocolError, Result};
use crate::frame::RawFrame;
use crate::sequence::SequenceNumber;

pub const SIGNATURE: &[u8; 2] = b"SL";
pub const HEADER_LEN: usize = 8;
pub const PAYLOAD_LEN: usize = 512;
pub const FRAME_LEN: usize = 520;

/// Parse a v3 frame from exactly 520 bytes.
pub fn parse(data: &[u8]) -> Result<RawFrame<'_>> {
    if data.len() < FRAME_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }
    if &data[0..2] != SIGNATURE.as_slice() {
        return Err(ProtocolError::InvalidSignature {
            expected: "SL",
            actual: [data[0], data[1]],
        });
    }

    let hex = std::str::from_utf8(&data[2..8])
        .map_err(|_| ProtocolError::InvalidSequence("sequence bytes are not UTF-8".into()))?;
    let sequence = SequenceNumber::from_v3_hex(hex)?;

    Ok(RawFrame::V3 {
        sequence,
        payload: &data[HEADER_LEN..FRAME_LEN],
    })
}

/// Write a v3 frame (520 bytes) from a sequence number and a 512-byte
/// miniSEED payload.
pub fn write(sequence: SequenceNumber, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() != PAYLOAD_LEN {
        return Err(ProtocolError::PayloadLengthMismatch {
            expected: PAYLOAD_LEN,
            actual: payload.len(),
        });
    }
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.extend_from_slice(SIGNATURE);
    frame.extend_from_slice(sequence.to_v3_hex().as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}
