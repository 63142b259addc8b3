//! miniSEED v2/v3 record codec.
//!
//! Implements the subset of the format the bridge consumes (unpacking
//! SEEDLink payloads) and produces (re-encoding packets for DataLink
//! publication): fixed 512-byte-class v2 records with Blockettes 1000/1001,
//! variable-length v3 records with CRC-32C, and the Text/Int32/Float32/
//! Float64/Steim1/Steim2 payload encodings.

pub mod decode;
pub mod encode;
pub mod sid;
pub mod steim;
mod time;
pub mod v2;
pub mod v3;

pub use decode::{MIN_RECORD_LENGTH, MseedRecord, decode};
pub use encode::{DataLinkPayload, to_datalink_payloads};

use crate::error::{ProtocolError, Result};

/// Payload encoding codes as stored in the record headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    Text,
    Int32,
    Float32,
    Float64,
    Steim1,
    Steim2,
}

impl SampleEncoding {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Text),
            3 => Ok(Self::Int32),
            4 => Ok(Self::Float32),
            5 => Ok(Self::Float64),
            10 => Ok(Self::Steim1),
            11 => Ok(Self::Steim2),
            _ => Err(ProtocolError::Unsupported(format!(
                "sample encoding code {code}"
            ))),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Int32 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::Steim1 => 10,
            Self::Steim2 => 11,
        }
    }
}

/// Output compression selection for the encoder. Steim variants are only
/// valid for Int32 samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Steim1,
    Steim2,
}

/// Identity and timing shared by every record packed from one packet.
#[derive(Clone, Debug)]
pub(crate) struct RecordSpec<'a> {
    pub network: &'a str,
    pub station: &'a str,
    pub location: &'a str,
    pub channel: &'a str,
    pub sampling_rate: f64,
    pub start_time_ns: i64,
}
