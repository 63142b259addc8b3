//! Wire-level types and codecs for the ringbridge daemon.
//!
//! This crate holds everything that can be expressed without I/O: seismic
//! stream identifiers and data packets, SEEDLink commands, responses, and
//! frames (v3 + v4), the miniSEED record codec (v2 + v3) used to unpack
//! upstream payloads and to re-encode packets for publication, and the
//! DataLink client-side framing spoken to a ring server.

pub mod command;
pub mod datalink;
pub mod error;
pub mod frame;
pub mod mseed;
pub mod packet;
pub mod response;
pub mod selector;
pub mod sequence;
pub mod stream_id;
pub mod version;

pub use command::Command;
pub use error::{ProtocolError, Result};
pub use frame::{PayloadFormat, PayloadSubformat, RawFrame};
pub use mseed::{Compression, DataLinkPayload};
pub use packet::{Packet, Samples};
pub use response::Response;
pub use selector::{SelectorKind, StreamSelector};
pub use sequence::SequenceNumber;
pub use stream_id::StreamIdentifier;
pub use version::ProtocolVersion;
