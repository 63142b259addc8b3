use crate::error::{ProtocolError, Result};
use crate::sequence::SequenceNumber;
use crate::version::ProtocolVersion;

/// The client-side SEEDLink command subset the bridge issues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Hello,
    /// Negotiate a protocol version (v4 servers only).
    SlProto { version: String },
    Station { station: String, network: String },
    Select { pattern: String },
    /// Arm the current station; with a sequence, resume just after it.
    Data { sequence: Option<SequenceNumber> },
    End,
    Bye,
}

impl Command {
    /// Serialize to wire bytes for the given protocol version.
    pub fn to_bytes(&self, version: ProtocolVersion) -> Result<Vec<u8>> {
        if let Self::SlProto { .. } = self
            && version == ProtocolVersion::V3
        {
            return Err(ProtocolError::VersionMismatch {
                command: "SLPROTO",
                version,
            });
        }
        Ok(format!("{}\r\n", self.format_line(version)).into_bytes())
    }

    fn format_line(&self, version: ProtocolVersion) -> String {
        match self {
            Self::Hello => "HELLO".to_owned(),
            Self::SlProto { version } => format!("SLPROTO {version}"),
            Self::Station { station, network } => match version {
                ProtocolVersion::V3 => format!("STATION {station} {network}"),
                ProtocolVersion::V4 => format!("STATION {network}_{station}"),
            },
            Self::Select { pattern } => format!("SELECT {pattern}"),
            Self::Data { sequence } => match sequence {
                None => "DATA".to_owned(),
                Some(seq) => match version {
                    ProtocolVersion::V3 => format!("DATA {}", seq.to_v3_hex()),
                    ProtocolVersion::V4 => format!("DATA {}", seq.to_v4_decimal()),
                },
            },
            Self::End => "END".to_owned(),
            Self::Bye => "BYE".to_owned(),
        }
    }
}
