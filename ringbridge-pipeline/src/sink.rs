use std::sync::Arc;
use std::time::Duration;

use ringbridge_protocol::datalink::{self, DlCommand, DlResponse};
use ringbridge_protocol::{Compression, Packet, ProtocolError, mseed};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::WriterCounters;
use crate::queue::PacketQueue;
use crate::source::wait_or_cancelled;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-write deadline on the upstream socket.
const IO_TIMEOUT: Duration = Duration::from_secs(1);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_SLEEP: Duration = Duration::from_millis(15);
/// This many write failures in a row kill the connection so the next
/// iteration re-enters the reconnect ladder.
const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 32;

fn default_reconnect_delays() -> Vec<Duration> {
    [0, 5, 30, 60].map(Duration::from_secs).to_vec()
}

/// Options for one DataLink sink.
#[derive(Clone, Debug)]
pub struct DataLinkOptions {
    pub host: String,
    pub port: u16,
    /// Client name sent in the ID handshake; capped at 199 characters.
    pub name: String,
    pub max_queue_size: usize,
    /// Maximum miniSEED record length, 1..=512.
    pub record_size: i32,
    /// Publish miniSEED 3 records instead of miniSEED 2.
    pub write_mseed3: bool,
    /// The reconnect ladder; each entry is waited (interruptibly) before
    /// one connection attempt.
    pub reconnect_delays: Vec<Duration>,
}

impl Default for DataLinkOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 16000,
            name: "ringbridgeDALIClient".to_owned(),
            max_queue_size: 8192,
            record_size: 512,
            write_mseed3: false,
            reconnect_delays: default_reconnect_delays(),
        }
    }
}

impl DataLinkOptions {
    /// Sets the client name; over-long names are truncated to 199 chars.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ProtocolError::InvalidArgument("name is empty".into()).into());
        }
        self.name = if name.chars().count() >= 200 {
            name.chars().take(199).collect()
        } else {
            name.to_owned()
        };
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidArgument("host is empty".into()).into());
        }
        if !(1..=512).contains(&self.record_size) {
            return Err(ProtocolError::InvalidArgument(format!(
                "record size {} must be in [1, 512]",
                self.record_size
            ))
            .into());
        }
        if self.reconnect_delays.is_empty() {
            return Err(
                ProtocolError::InvalidArgument("reconnect ladder is empty".into()).into(),
            );
        }
        Ok(())
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One DataLink publisher: owns its upstream connection and a bounded
/// queue, re-encodes packets as miniSEED, and writes them in order.
pub struct DataLinkSink {
    options: DataLinkOptions,
    queue: Arc<PacketQueue>,
    counters: Arc<WriterCounters>,
    cancel: CancellationToken,
    compression: Compression,
}

impl DataLinkSink {
    pub fn new(options: DataLinkOptions) -> Result<Self> {
        options.validate()?;
        let queue = Arc::new(PacketQueue::new(options.max_queue_size));
        Ok(Self {
            options,
            queue,
            counters: Arc::new(WriterCounters::default()),
            cancel: CancellationToken::new(),
            compression: Compression::None,
        })
    }

    /// Queue a packet for publication, evicting the oldest on overflow.
    pub fn enqueue(&self, packet: Packet) {
        self.queue.push(packet);
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn counters(&self) -> Arc<WriterCounters> {
        Arc::clone(&self.counters)
    }

    pub fn failed_to_enqueue(&self) -> u64 {
        self.queue.failed_to_enqueue()
    }

    /// Packets currently waiting in this sink's queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the long-running writer task.
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let options = self.options.clone();
        let queue = Arc::clone(&self.queue);
        let counters = Arc::clone(&self.counters);
        let cancel = self.cancel.clone();
        let compression = self.compression;
        tokio::spawn(run(options, queue, counters, cancel, compression))
    }

    /// Request cooperative termination; idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

struct DlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl DlConnection {
    async fn connect(address: &str, client_name: &str) -> Result<Self> {
        debug!(address, "TCP connecting");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| PipelineError::Timeout(CONNECT_TIMEOUT))?
            .map_err(PipelineError::Io)?;
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let mut connection = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        };

        connection.send(&DlCommand::Id { client: client_name }).await?;
        match connection.read_response().await? {
            DlResponse::Id { server, .. } => {
                debug!(%server, "DataLink server identified");
                Ok(connection)
            }
            other => Err(PipelineError::UnexpectedResponse(format!(
                "expected ID response, got {other:?}"
            ))),
        }
    }

    async fn send(&mut self, command: &DlCommand<'_>) -> Result<()> {
        let bytes = command.to_bytes()?;
        tokio::time::timeout(IO_TIMEOUT, async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        })
        .await
        .map_err(|_| PipelineError::Timeout(IO_TIMEOUT))?
        .map_err(PipelineError::Io)?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<DlResponse> {
        let (header, payload) = tokio::time::timeout(IO_TIMEOUT, async {
            let mut preheader = [0u8; datalink::PREHEADER_LEN];
            self.reader.read_exact(&mut preheader).await?;
            let header_len = datalink::parse_preheader(&preheader)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let mut header = vec![0u8; header_len];
            self.reader.read_exact(&mut header).await?;
            let header = String::from_utf8_lossy(&header).into_owned();
            let payload_len = datalink::response_payload_size(&header);
            let mut payload = vec![0u8; payload_len];
            self.reader.read_exact(&mut payload).await?;
            Ok::<_, std::io::Error>((header, payload))
        })
        .await
        .map_err(|_| PipelineError::Timeout(IO_TIMEOUT))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PipelineError::Disconnected
            } else {
                PipelineError::Io(e)
            }
        })?;
        Ok(datalink::parse_response(&header, &payload)?)
    }
}

/// Walk the reconnect ladder. `Ok(None)` means cancellation pre-empted it;
/// exhausting every rung is fatal for the owning task.
async fn reconnect(
    options: &DataLinkOptions,
    cancel: &CancellationToken,
) -> Result<Option<DlConnection>> {
    let address = options.address();
    for delay in &options.reconnect_delays {
        if !delay.is_zero() {
            info!(delay_s = delay.as_secs(), "will attempt to reconnect");
        }
        if wait_or_cancelled(cancel, *delay).await || cancel.is_cancelled() {
            return Ok(None);
        }
        info!(%address, "connecting to DataLink server");
        match DlConnection::connect(&address, &options.name).await {
            Ok(connection) => {
                info!(%address, "connected to DataLink server");
                return Ok(Some(connection));
            }
            Err(err) => warn!(error = %err, "failed to connect"),
        }
    }
    Err(PipelineError::ReconnectFailed {
        attempts: options.reconnect_delays.len(),
    })
}

async fn run(
    options: DataLinkOptions,
    queue: Arc<PacketQueue>,
    counters: Arc<WriterCounters>,
    cancel: CancellationToken,
    compression: Compression,
) -> Result<()> {
    debug!(name = %options.name, "entering packet writer loop");
    let mut connection: Option<DlConnection> = None;
    let mut consecutive_write_failures = 0u32;
    let mut last_io = Instant::now();

    while !cancel.is_cancelled() {
        if connection.is_none() {
            warn!("currently not connected");
            match reconnect(&options, &cancel).await? {
                Some(fresh) => {
                    connection = Some(fresh);
                    consecutive_write_failures = 0;
                    last_io = Instant::now();
                }
                None => break,
            }
        }
        let Some(active) = connection.as_mut() else {
            continue;
        };

        let Some(packet) = queue.pop() else {
            if last_io.elapsed() >= KEEPALIVE_INTERVAL {
                match active.send(&DlCommand::KeepAlive).await {
                    Ok(()) => last_io = Instant::now(),
                    Err(err) => {
                        warn!(error = %err, "keepalive failed, killing connection");
                        connection = None;
                        continue;
                    }
                }
            }
            if wait_or_cancelled(&cancel, IDLE_SLEEP).await {
                break;
            }
            continue;
        };

        let payloads = match mseed::to_datalink_payloads(
            &packet,
            options.record_size,
            options.write_mseed3,
            compression,
        ) {
            Ok(payloads) => payloads,
            Err(err) => {
                counters.record_invalid();
                warn!(error = %err, "failed to convert packet to miniSEED");
                continue;
            }
        };
        let stream_id = match packet.identifier().and_then(|id| id.data_link_name()) {
            Ok(stream_id) => stream_id,
            Err(err) => {
                counters.record_invalid();
                warn!(error = %err, "failed to build DataLink stream name");
                continue;
            }
        };

        for payload in &payloads {
            if payload.data.is_empty() {
                warn!(%stream_id, "skipping empty record");
                continue;
            }
            let write = DlCommand::Write {
                stream_id: &stream_id,
                start_us: payload.start_time_ns / 1_000,
                end_us: payload.end_time_ns / 1_000,
                payload: &payload.data,
            };
            match active.send(&write).await {
                Ok(()) => {
                    consecutive_write_failures = 0;
                    counters.record_written();
                    last_io = Instant::now();
                }
                Err(err) => {
                    consecutive_write_failures += 1;
                    counters.record_failed_write();
                    warn!(%stream_id, error = %err, "DataLink write failed");
                    if consecutive_write_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                        error!("too many consecutive write failures, killing connection");
                        connection = None;
                        break;
                    }
                }
            }
        }
    }

    debug!(name = %options.name, "leaving packet writer loop");
    Ok(())
}
