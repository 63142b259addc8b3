pub mod v3;
pub mod v4;

use crate::error::{ProtocolError, Result};
use crate::sequence::SequenceNumber;

/// Payload format of a v4 frame. v3 frames always carry miniSEED 2.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    MiniSeed2,
    MiniSeed3,
    Json,
    Xml,
}

impl PayloadFormat {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'2' => Ok(Self::MiniSeed2),
            b'3' => Ok(Self::MiniSeed3),
            b'J' => Ok(Self::Json),
            b'X' => Ok(Self::Xml),
            _ => Err(ProtocolError::InvalidPayloadFormat(b)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::MiniSeed2 => b'2',
            Self::MiniSeed3 => b'3',
            Self::Json => b'J',
            Self::Xml => b'X',
        }
    }

    /// The bridge only forwards miniSEED payloads; everything else is
    /// discarded by the source.
    pub fn is_mseed(self) -> bool {
        matches!(self, Self::MiniSeed2 | Self::MiniSeed3)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PayloadSubformat {
    Data,
    Event,
    Calibration,
    Timing,
    Log,
    Opaque,
    Info,
    InfoError,
}

impl PayloadSubformat {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'D' => Ok(Self::Data),
            b'E' => Ok(Self::Event),
            b'C' => Ok(Self::Calibration),
            b'T' => Ok(Self::Timing),
            b'L' => Ok(Self::Log),
            b'O' => Ok(Self::Opaque),
            b'I' => Ok(Self::Info),
            b'R' => Ok(Self::InfoError),
            _ => Err(ProtocolError::InvalidPayloadSubformat(b)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Data => b'D',
            Self::Event => b'E',
            Self::Calibration => b'C',
            Self::Timing => b'T',
            Self::Log => b'L',
            Self::Opaque => b'O',
            Self::Info => b'I',
            Self::InfoError => b'R',
        }
    }
}

/// Zero-copy frame borrowing its payload from the input buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawFrame<'a> {
    V3 {
        sequence: SequenceNumber,
        payload: &'a [u8],
    },
    V4 {
        format: PayloadFormat,
        subformat: PayloadSubformat,
        sequence: SequenceNumber,
        station_id: &'a str,
        payload: &'a [u8],
    },
}

impl<'a> RawFrame<'a> {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::V3 { sequence, .. } | Self::V4 { sequence, .. } => *sequence,
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        match self {
            Self::V3 { payload, .. } | Self::V4 { payload, .. } => payload,
        }
    }

    /// Payload format: v3 frames are always miniSEED 2.
    pub fn payload_format(&self) -> PayloadFormat {
        match self {
            Self::V3 { .. } => PayloadFormat::MiniSeed2,
            Self::V4 { format, .. } => *format,
        }
    }
}

/// An owned SEEDLink frame with its payload copied to the heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnedFrame {
    V3 {
        sequence: SequenceNumber,
        payload: Vec<u8>,
    },
    V4 {
        format: PayloadFormat,
        subformat: PayloadSubformat,
        sequence: SequenceNumber,
        station_id: String,
        payload: Vec<u8>,
    },
}

impl OwnedFrame {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::V3 { sequence, .. } | Self::V4 { sequence, .. } => *sequence,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Self::V3 { payload, .. } | Self::V4 { payload, .. } => payload,
        }
    }

    pub fn payload_format(&self) -> PayloadFormat {
        match self {
            Self::V3 { .. } => PayloadFormat::MiniSeed2,
            Self::V4 { format, .. } => *format,
        }
    }

    /// Network/station pair for sequence tracking, when recoverable.
    ///
    /// For v3 the pair is read from the fixed miniSEED 2 header inside the
    /// payload; for v4 from the frame's `NET_STA` station id.
    pub fn station_key(&self) -> Option<(String, String)> {
        match self {
            Self::V3 { payload, .. } => {
                if payload.len() < 20 {
                    return None;
                }
                let station = std::str::from_utf8(&payload[8..13]).ok()?.trim().to_owned();
                let network = std::str::from_utf8(&payload[18..20])
                    .ok()?
                    .trim()
                    .to_owned();
                if station.is_empty() || network.is_empty() {
                    return None;
                }
                Some((network, station))
            }
            Self::V4 { station_id, .. } => {
                let (network, station) = station_id.split_once('_')?;
                Some((network.to_owned(), station.to_owned()))
            }
        }
    }
}

impl<'a> From<RawFrame<'a>> for OwnedFrame {
    fn from(raw: RawFrame<'a>) -> Self {
        match raw {
            RawFrame::V3 { sequence, payload } => Self::V3 {
                sequence,
                payload: payload.to_vec(),
            },
            RawFrame::V4 {
                format,
                subformat,
                sequence,
                station_id,
                payload,
            } => Self::V4 {
                format,
                subformat,
                sequence,
                station_id: station_id.to_owned(),
                payload: payload.to_vec(),
            },
        }
    }
}
