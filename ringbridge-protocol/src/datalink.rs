//! DataLink client-side framing.
//!
//! Every DataLink packet is a 3-byte preheader (`DL` + header length), an
//! ASCII header, and an optional binary payload. The bridge only speaks the
//! publishing subset: ID handshake, KEEPALIVE, and WRITE without
//! acknowledgement.

use crate::error::{ProtocolError, Result};
use crate::response::parse_capabilities;

pub const SIGNATURE: &[u8; 2] = b"DL";
pub const PREHEADER_LEN: usize = 3;
pub const MAX_HEADER_LEN: usize = 255;

/// Client-to-server DataLink packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DlCommand<'a> {
    /// Identify this client; the server answers with its own ID header.
    Id { client: &'a str },
    /// Idle-link heartbeat; the server sends no reply.
    KeepAlive,
    /// Publish one record, no acknowledgement requested. Times are the
    /// protocol's native integer microseconds.
    Write {
        stream_id: &'a str,
        start_us: i64,
        end_us: i64,
        payload: &'a [u8],
    },
}

impl DlCommand<'_> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (header, payload): (String, &[u8]) = match self {
            Self::Id { client } => (format!("ID {client}"), &[]),
            Self::KeepAlive => ("KEEPALIVE".to_owned(), &[]),
            Self::Write {
                stream_id,
                start_us,
                end_us,
                payload,
            } => (
                format!(
                    "WRITE {stream_id} {start_us} {end_us} N {}",
                    payload.len()
                ),
                payload,
            ),
        };
        if header.len() > MAX_HEADER_LEN {
            return Err(ProtocolError::InvalidCommand(format!(
                "DataLink header of {} bytes exceeds {MAX_HEADER_LEN}",
                header.len()
            )));
        }

        let mut frame = Vec::with_capacity(PREHEADER_LEN + header.len() + payload.len());
        frame.extend_from_slice(SIGNATURE);
        frame.push(header.len() as u8);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

/// Server-to-client DataLink responses the bridge understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DlResponse {
    Id {
        server: String,
        capabilities: Vec<String>,
    },
    Ok {
        value: i64,
        message: String,
    },
    Error {
        value: i64,
        message: String,
    },
}

/// Validate a preheader and return the header length that follows it.
pub fn parse_preheader(bytes: &[u8; PREHEADER_LEN]) -> Result<usize> {
    if &bytes[0..2] != SIGNATURE.as_slice() {
        return Err(ProtocolError::InvalidSignature {
            expected: "DL",
            actual: [bytes[0], bytes[1]],
        });
    }
    Ok(usize::from(bytes[2]))
}

/// Payload size announced by a response header (third token of OK/ERROR).
pub fn response_payload_size(header: &str) -> usize {
    let mut parts = header.split_whitespace();
    match parts.next() {
        Some("OK") | Some("ERROR") => parts
            .nth(1)
            .and_then(|size| size.parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

/// Parse a response header (and its payload, for OK/ERROR messages).
pub fn parse_response(header: &str, payload: &[u8]) -> Result<DlResponse> {
    let header = header.trim_end();
    let mut parts = header.split_whitespace();
    let keyword = parts
        .next()
        .ok_or_else(|| ProtocolError::InvalidResponse("empty DataLink header".into()))?;

    match keyword {
        "ID" => {
            let rest = header[2..].trim();
            let server = match rest.find("::") {
                Some(idx) => rest[..idx].trim().to_owned(),
                None => rest.to_owned(),
            };
            Ok(DlResponse::Id {
                server,
                capabilities: parse_capabilities(rest),
            })
        }
        "OK" | "ERROR" => {
            let value = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    ProtocolError::InvalidResponse(format!("missing value in {header:?}"))
                })?;
            let message = String::from_utf8_lossy(payload).trim_end().to_owned();
            if keyword == "OK" {
                Ok(DlResponse::Ok { value, message })
            } else {
                Ok(DlResponse::Error { value, message })
            }
        }
        _ => Err(ProtocolError::InvalidResponse(format!(
            "unrecognized DataLink header: {header:?}"
        ))),
    }
}
