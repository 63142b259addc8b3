use crate::error::{ProtocolError, Result};
use crate::frame::{PayloadFormat, PayloadSubformat, RawFrame};
use crate::sequence::SequenceNumber;

pub const SIGNATURE: &[u8; 2] = b"SE";

/// Fixed header: 2 (sig) + 1 (format) + 1 (subformat) + 4 (payload len)
/// + 8 (sequence) + 1 (station id len) = 17 bytes.
pub const MIN_HEADER_LEN: usize = 17;

/// Parse a v4 frame from the start of `data`.
///
/// Returns `(frame, bytes_consumed)` since v4 frames are variable-length.
pub fn parse(data: &[u8]) -> Result<(RawFrame<'_>, usize)> {
    if data.len() < MIN_HEADER_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: MIN_HEADER_LEN,
            actual: data.len(),
        });
    }
    if &data[0..2] != SIGNATURE.as_slice() {
        return Err(ProtocolError::InvalidSignature {
            expected: "SE",
            actual: [data[0], data[1]],
        });
    }

    let format = PayloadFormat::from_byte(data[2])?;
    let subformat = PayloadSubformat::from_byte(data[3])?;
    let payload_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let sequence = SequenceNumber::from_v4_le_bytes(data[8..16].try_into().unwrap());
    let station_id_len = data[16] as usize;

    let header_len = MIN_HEADER_LEN + station_id_len;
    let total_len = header_len + payload_len;
    if data.len() < total_len {
        return Err(ProtocolError::FrameTooShort {
            expected: total_len,
            actual: data.len(),
        });
    }

    let station_id = std::str::from_utf8(&data[MIN_HEADER_LEN..header_len])
        .map_err(|_| ProtocolError::InvalidCommand("station id is not UTF-8".into()))?;

    Ok((
        RawFrame::V4 {
            format,
            subformat,
            sequence,
            station_id,
            payload: &data[header_len..total_len],
        },
        total_len,
    ))
}

/// Write a v4 frame.
pub fn write(
    format: PayloadFormat,
    subformat: PayloadSubformat,
    sequence: SequenceNumber,
    station_id: &str,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let station_id = station_id.as_bytes();
    if station_id.len() > u8::MAX as usize {
        return Err(ProtocolError::InvalidCommand("station id too long".into()));
    }

    let mut frame = Vec::with_capacity(MIN_HEADER_LEN + station_id.len() + payload.len());
    frame.extend_from_slice(SIGNATURE);
    frame.push(format.to_byte());
    frame.push(subformat.to_byte());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&sequence.to_v4_le_bytes());
    frame.push(station_id.len() as u8);
    frame.extend_from_slice(station_id);
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_parse_roundtrip() {
        let payload = b"miniseed bytes would go here";
        let frame = write(
            PayloadFormat::MiniSeed3,
            PayloadSubformat::Data,
            SequenceNumber::new(42),
            "UU_FTU",
            payload,
        )
        .unwrap();

        let (parsed, consumed) = parse(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(parsed.sequence(), SequenceNumber::new(42));
        assert_eq!(parsed.payload(), payload);
        match parsed {
            RawFrame::V4 {
                format,
                subformat,
                station_id,
                ..
            } => {
                assert_eq!(format, PayloadFormat::MiniSeed3);
                assert_eq!(subformat, PayloadSubformat::Data);
                assert_eq!(station_id, "UU_FTU");
            }
            RawFrame::V3 { .. } => panic!("expected V4 frame"),
        }
    }

    #[test]
    fn format_and_subformat_bytes_roundtrip() {
        for format in [
            PayloadFormat::MiniSeed2,
            PayloadFormat::MiniSeed3,
            PayloadFormat::Json,
            PayloadFormat::Xml,
        ] {
            assert_eq!(PayloadFormat::from_byte(format.to_byte()).unwrap(), format);
        }
        for subformat in [
            PayloadSubformat::Data,
            PayloadSubformat::Event,
            PayloadSubformat::Calibration,
            PayloadSubformat::Timing,
            PayloadSubformat::Log,
            PayloadSubformat::Opaque,
            PayloadSubformat::Info,
            PayloadSubformat::InfoError,
        ] {
            assert_eq!(
                PayloadSubformat::from_byte(subformat.to_byte()).unwrap(),
                subformat
            );
        }
    }

    #[test]
    fn only_mseed_formats_are_forwarded() {
        assert!(PayloadFormat::MiniSeed2.is_mseed());
        assert!(PayloadFormat::MiniSeed3.is_mseed());
        assert!(!PayloadFormat::Json.is_mseed());
        assert!(!PayloadFormat::Xml.is_mseed());
    }

    #[test]
    fn parse_truncated() {
        let frame = write(
            PayloadFormat::MiniSeed2,
            PayloadSubformat::Data,
            SequenceNumber::new(0),
            "UU_FTU",
            b"payload data",
        )
        .unwrap();
        assert!(matches!(
            parse(&frame[..frame.len() - 4]).unwrap_err(),
            ProtocolError::FrameTooShort { .. }
        ));
        assert!(parse(&[0u8; 5]).is_err());
    }

    #[test]
    fn invalid_format_bytes() {
        assert!(matches!(
            PayloadFormat::from_byte(b'Z').unwrap_err(),
            ProtocolError::InvalidPayloadFormat(b'Z')
        ));
        assert!(matches!(
            PayloadSubformat::from_byte(b'Z').unwrap_err(),
            ProtocolError::InvalidPayloadSubformat(b'Z')
        ));
    }

    #[test]
    fn wrong_signature() {
        let mut frame = write(
            PayloadFormat::MiniSeed2,
            PayloadSubformat::Data,
            SequenceNumber::new(0),
            "X",
            b"d",
        )
        .unwrap();
        frame[0] = b'Q';
        assert!(matches!(
            parse(&frame).unwrap_err(),
            ProtocolError::InvalidSignature { .. }
        ));
    }
}
