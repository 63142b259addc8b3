use crate::version::ProtocolVersion;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not set")]
    NotSet(&'static str),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("unpack failed: {0}")]
    UnpackFailed(String),

    #[error("frame too short: expected {expected}, actual {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("invalid signature: expected {expected:?}, actual {actual:?}")]
    InvalidSignature {
        expected: &'static str,
        actual: [u8; 2],
    },

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("version mismatch: {command} not valid for {version:?}")]
    VersionMismatch {
        command: &'static str,
        version: ProtocolVersion,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid payload format: {0}")]
    InvalidPayloadFormat(u8),

    #[error("invalid payload subformat: {0}")]
    InvalidPayloadSubformat(u8),

    #[error("payload length mismatch: expected {expected}, actual {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
