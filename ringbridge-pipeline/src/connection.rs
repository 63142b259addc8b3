use std::time::Duration;

use ringbridge_protocol::frame::{OwnedFrame, v3, v4};
use ringbridge_protocol::{Command, ProtocolVersion};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace, warn};

use crate::error::{PipelineError, Result};

/// Buffered TCP connection to a SEEDLink server.
///
/// A zero `read_timeout` disables the idle deadline entirely.
pub struct SlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_timeout: Duration,
}

async fn with_deadline<T, F>(deadline: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if deadline.is_zero() {
        future.await
    } else {
        tokio::time::timeout(deadline, future)
            .await
            .map_err(|_| PipelineError::Timeout(deadline))?
    }
}

impl SlConnection {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        debug!(addr, "TCP connecting");
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PipelineError::Timeout(connect_timeout))?
            .map_err(PipelineError::Io)?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_timeout,
        })
    }

    pub async fn send_command(&mut self, command: &Command, version: ProtocolVersion) -> Result<()> {
        trace!(?command, "sending");
        let bytes = command.to_bytes(version)?;
        self.writer.write_all(&bytes).await.map_err(PipelineError::Io)?;
        self.writer.flush().await.map_err(PipelineError::Io)?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> Result<String> {
        let deadline = self.read_timeout;
        let reader = &mut self.reader;
        with_deadline(deadline, async move {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.map_err(PipelineError::Io)?;
            if n == 0 {
                return Err(PipelineError::Disconnected);
            }
            Ok(line)
        })
        .await
        .inspect_err(|error| {
            if matches!(error, PipelineError::Timeout(_)) {
                warn!(timeout = ?deadline, "read timeout");
            }
        })
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let deadline = self.read_timeout;
        let reader = &mut self.reader;
        with_deadline(deadline, async move {
            match reader.read_exact(buffer).await {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(PipelineError::Disconnected)
                }
                Err(e) => Err(PipelineError::Io(e)),
            }
        })
        .await
    }

    /// Read one frame in the negotiated protocol version.
    pub async fn read_frame(&mut self, version: ProtocolVersion) -> Result<OwnedFrame> {
        match version {
            ProtocolVersion::V3 => {
                let mut buffer = [0u8; v3::FRAME_LEN];
                self.read_exact(&mut buffer).await?;
                Ok(OwnedFrame::from(v3::parse(&buffer)?))
            }
            ProtocolVersion::V4 => {
                let mut header = [0u8; v4::MIN_HEADER_LEN];
                self.read_exact(&mut header).await?;

                let payload_len =
                    u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
                let station_id_len = header[16] as usize;
                let remaining = station_id_len + payload_len;

                let mut full = Vec::with_capacity(v4::MIN_HEADER_LEN + remaining);
                full.extend_from_slice(&header);
                full.resize(v4::MIN_HEADER_LEN + remaining, 0);
                self.read_exact(&mut full[v4::MIN_HEADER_LEN..]).await?;

                let (raw, _consumed) = v4::parse(&full)?;
                Ok(OwnedFrame::from(raw))
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(PipelineError::Io)?;
        Ok(())
    }
}
