use std::time::Duration;

/// Errors raised by the pipeline runtime.
///
/// Per-packet failures (`Protocol`) are logged and swallowed at the call
/// sites; network errors feed the reconnect ladders; `Fatal` surfaces
/// through task handles to the coordinator and terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// TCP or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire codec or per-packet error from the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ringbridge_protocol::ProtocolError),

    /// Operation exceeded its timeout.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Peer closed the connection.
    #[error("disconnected")]
    Disconnected,

    /// Server answered a command with an error.
    #[error("server error: {0}")]
    ServerError(String),

    /// Server sent something the protocol state does not allow.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Component used before its options validated.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Every rung of a reconnect ladder failed.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectFailed { attempts: usize },

    /// Metrics bookkeeping rejected a packet.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Unrecoverable; the coordinator terminates the process.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
