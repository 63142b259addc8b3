use crate::error::{ProtocolError, Result};

/// A SEEDLink packet sequence number.
///
/// v3 renders sequences as 6 uppercase hex digits (`"00001A"`), v4 as a
/// plain decimal string. The same value type backs both, plus the state-file
/// cursors persisted for resume.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Sentinel: no sequence known, stream from the next available packet.
    pub const UNSET: Self = Self(u64::MAX);

    /// Maximum representable v3 sequence (6 hex digits).
    pub const V3_MAX: u64 = 0xFF_FFFF;

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Parse the v3 wire form: exactly 6 hex digits.
    pub fn from_v3_hex(hex: &str) -> Result<Self> {
        if hex.len() != 6 {
            return Err(ProtocolError::InvalidSequence(format!(
                "v3 sequence must be 6 hex chars, got {hex:?}"
            )));
        }
        let value = u64::from_str_radix(hex, 16)
            .map_err(|_| ProtocolError::InvalidSequence(format!("bad v3 hex: {hex:?}")))?;
        Ok(Self(value))
    }

    /// Render the v3 wire form (6 uppercase hex digits).
    pub fn to_v3_hex(self) -> String {
        format!("{:06X}", self.0)
    }

    /// Parse the v4 wire form: a decimal string.
    pub fn from_v4_decimal(s: &str) -> Result<Self> {
        let value: u64 = s
            .parse()
            .map_err(|_| ProtocolError::InvalidSequence(format!("bad v4 decimal: {s:?}")))?;
        Ok(Self(value))
    }

    /// Render the v4 wire form.
    pub fn to_v4_decimal(self) -> String {
        self.0.to_string()
    }

    /// Parse from the v4 binary frame header (little-endian u64).
    pub fn from_v4_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Render for the v4 binary frame header.
    pub fn to_v4_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::UNSET {
            write!(f, "UNSET")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_hex_roundtrip() {
        for value in [0u64, 26, 255, 0xFFFFFF] {
            let seq = SequenceNumber::new(value);
            assert_eq!(SequenceNumber::from_v3_hex(&seq.to_v3_hex()).unwrap(), seq);
        }
    }

    #[test]
    fn v3_hex_parse() {
        assert_eq!(SequenceNumber::from_v3_hex("00001A").unwrap().value(), 26);
        assert_eq!(SequenceNumber::from_v3_hex("00001a").unwrap().value(), 26);
        assert_eq!(
            SequenceNumber::from_v3_hex("FFFFFF").unwrap().value(),
            SequenceNumber::V3_MAX
        );
    }

    #[test]
    fn v3_hex_rejects_bad_input() {
        assert!(SequenceNumber::from_v3_hex("1A").is_err());
        assert!(SequenceNumber::from_v3_hex("0000001A").is_err());
        assert!(SequenceNumber::from_v3_hex("ZZZZZZ").is_err());
    }

    #[test]
    fn v4_decimal_roundtrip() {
        let seq = SequenceNumber::from_v4_decimal("981").unwrap();
        assert_eq!(seq.value(), 981);
        assert_eq!(seq.to_v4_decimal(), "981");
        assert!(SequenceNumber::from_v4_decimal("-3").is_err());
        assert!(SequenceNumber::from_v4_decimal("abc").is_err());
    }

    #[test]
    fn v4_le_bytes_roundtrip() {
        let seq = SequenceNumber::new(0x0102_0304_0506_0708);
        assert_eq!(SequenceNumber::from_v4_le_bytes(seq.to_v4_le_bytes()), seq);
    }

    #[test]
    fn ordering_and_display() {
        assert!(SequenceNumber::new(10) < SequenceNumber::new(11));
        assert_eq!(SequenceNumber::new(42).to_string(), "42");
        assert_eq!(SequenceNumber::UNSET.to_string(), "UNSET");
    }
}
