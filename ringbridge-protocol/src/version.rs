/// SEEDLink protocol version negotiated with the upstream server.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Legacy v3: text commands, fixed 520-byte `SL` frames.
    V3,
    /// v4: negotiated via SLPROTO, variable-length `SE` frames.
    V4,
}
