use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ringbridge_protocol::frame::OwnedFrame;
use ringbridge_protocol::response::{parse_capabilities, supports_v4};
use ringbridge_protocol::{
    Command, Packet, ProtocolError, ProtocolVersion, Response, Samples, StreamIdentifier,
    StreamSelector, mseed,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::SlConnection;
use crate::error::{PipelineError, Result};
use crate::state::StateStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives every unpacked packet; failures are logged and swallowed.
pub type PacketCallback = Arc<dyn Fn(Packet) -> Result<()> + Send + Sync>;

/// Options for the SEEDLink source.
#[derive(Clone, Debug)]
pub struct SeedLinkOptions {
    pub host: String,
    pub port: u16,
    pub state_file: Option<PathBuf>,
    /// Persist the state file every this many forwarded records.
    pub state_file_update_interval: u16,
    pub delete_state_file_on_start: bool,
    pub delete_state_file_on_stop: bool,
    /// Reset the connection after this long without data; zero disables.
    pub network_timeout: Duration,
    pub network_reconnect_delay: Duration,
    pub selectors: Vec<StreamSelector>,
    /// Negotiate SEEDLink v4 when the server offers it.
    pub prefer_v4: bool,
}

impl Default for SeedLinkOptions {
    fn default() -> Self {
        Self {
            host: "rtserve.iris.washington.edu".to_owned(),
            port: 18000,
            state_file: None,
            state_file_update_interval: 100,
            delete_state_file_on_start: false,
            delete_state_file_on_stop: false,
            network_timeout: Duration::from_secs(600),
            network_reconnect_delay: Duration::from_secs(30),
            selectors: Vec::new(),
            prefer_v4: true,
        }
    }
}

impl SeedLinkOptions {
    /// Register a stream selector; duplicates are rejected.
    pub fn add_selector(&mut self, selector: StreamSelector) -> Result<()> {
        if !selector.has_network() {
            return Err(ProtocolError::InvalidArgument("network not set".into()).into());
        }
        for existing in &self.selectors {
            if existing == &selector {
                return Err(ProtocolError::InvalidArgument("duplicate selector".into()).into());
            }
        }
        self.selectors.push(selector);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProtocolError::InvalidArgument("host is empty".into()).into());
        }
        Ok(())
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The SEEDLink reader: maintains the upstream connection, unpacks every
/// miniSEED payload into packets, and forwards them through the callback.
pub struct SeedLinkSource {
    options: SeedLinkOptions,
    callback: PacketCallback,
    cancel: CancellationToken,
    initialized: bool,
}

impl SeedLinkSource {
    pub fn new(callback: PacketCallback, options: SeedLinkOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            callback,
            cancel: CancellationToken::new(),
            initialized: true,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Spawn the long-running reader task.
    pub fn start(&self) -> Result<JoinHandle<Result<()>>> {
        if !self.initialized {
            return Err(PipelineError::NotInitialized("SEEDLink source"));
        }
        let options = self.options.clone();
        let callback = Arc::clone(&self.callback);
        let cancel = self.cancel.clone();
        Ok(tokio::spawn(run(options, callback, cancel)))
    }

    /// Request cooperative termination; idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Unpack every miniSEED record in a raw payload span into packets.
///
/// An all-blank location code maps to `--` so downstream naming stays
/// unambiguous. Any parse error or unsupported sample type aborts the
/// whole span.
pub fn unpack_packets(buffer: &[u8]) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    while buffer.len() - offset > mseed::MIN_RECORD_LENGTH {
        let record = mseed::decode(&buffer[offset..])?;

        let mut identifier = StreamIdentifier::new();
        identifier.set_network(&record.network)?;
        identifier.set_station(&record.station)?;
        identifier.set_channel(&record.channel)?;
        if record.location.is_empty() {
            identifier.set_location_code("--")?;
        } else {
            identifier.set_location_code(&record.location)?;
        }

        let mut packet = Packet::new();
        packet.set_identifier(identifier)?;
        packet.set_sampling_rate(record.sampling_rate)?;
        packet.set_start_time_ns(record.start_time_ns);
        if !record.samples.is_empty() && matches!(record.samples, Samples::Text(_)) {
            return Err(ProtocolError::Unsupported(
                "text records cannot become data packets".into(),
            )
            .into());
        }
        packet.set_samples(record.samples);
        packets.push(packet);
        offset += record.record_length;
    }
    Ok(packets)
}

/// Wait for `delay`, returning true when cancellation pre-empted the wait.
pub(crate) async fn wait_or_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

enum SessionEnd {
    Cancelled,
    Disconnected,
}

async fn run(
    options: SeedLinkOptions,
    callback: PacketCallback,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = StateStore::open(
        options.state_file.as_deref(),
        options.delete_state_file_on_start,
        options.delete_state_file_on_stop,
    );
    let mut forwarded: u64 = 0;

    debug!("entering SEEDLink polling loop");
    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }
        // The outer select bounds cancellation latency even while a
        // handshake read is in flight.
        let end = tokio::select! {
            _ = cancel.cancelled() => Ok(SessionEnd::Cancelled),
            end = session(&options, &callback, &cancel, &mut state, &mut forwarded) => end,
        };
        match end {
            Ok(SessionEnd::Cancelled) => break Ok(()),
            Ok(SessionEnd::Disconnected) => {
                warn!(
                    delay = ?options.network_reconnect_delay,
                    "SEEDLink connection lost, reconnecting"
                );
            }
            Err(error @ PipelineError::Fatal(_)) => break Err(error),
            Err(error) => {
                warn!(%error, delay = ?options.network_reconnect_delay, "SEEDLink session failed");
            }
        }
        if wait_or_cancelled(&cancel, options.network_reconnect_delay).await {
            break Ok(());
        }
    };

    state.close();
    info!("leaving SEEDLink polling loop");
    if result.is_ok() && !cancel.is_cancelled() {
        return Err(PipelineError::Fatal("premature end of SEEDLink import".into()));
    }
    result
}

/// One connection lifetime: connect, negotiate, configure, stream.
async fn session(
    options: &SeedLinkOptions,
    callback: &PacketCallback,
    cancel: &CancellationToken,
    state: &mut StateStore,
    forwarded: &mut u64,
) -> Result<SessionEnd> {
    let address = options.address();
    info!(%address, "connecting to SEEDLink server");
    let mut connection =
        SlConnection::connect(&address, CONNECT_TIMEOUT, options.network_timeout).await?;

    // HELLO handshake
    connection
        .send_command(&Command::Hello, ProtocolVersion::V3)
        .await?;
    let line1 = connection.read_line().await?;
    let line2 = connection.read_line().await?;
    let Response::Hello {
        software,
        version,
        extra,
        organization,
    } = Response::parse_hello(&line1, &line2)?
    else {
        return Err(PipelineError::UnexpectedResponse(
            "expected HELLO banner".into(),
        ));
    };
    info!(%software, %version, %organization, "SEEDLink server answered");

    // Optional v4 negotiation
    let capabilities = parse_capabilities(&extra);
    let mut protocol = ProtocolVersion::V3;
    if options.prefer_v4 && supports_v4(&capabilities) {
        connection
            .send_command(
                &Command::SlProto {
                    version: "4.0".into(),
                },
                ProtocolVersion::V4,
            )
            .await?;
        let line = connection.read_line().await?;
        match Response::parse_line(&line)? {
            Response::Ok => protocol = ProtocolVersion::V4,
            Response::Error { description } => {
                warn!(%description, "v4 negotiation failed, falling back to v3");
            }
            Response::Hello { .. } => {
                return Err(PipelineError::UnexpectedResponse(format!(
                    "expected OK or ERROR for SLPROTO, got: {line:?}"
                )));
            }
        }
    }
    debug!(?protocol, "negotiated protocol");

    // Register selectors; invalid ones are skipped. If every selector
    // fails, fall back to uni-station mode before giving up entirely.
    let mut registered = 0usize;
    for selector in &options.selectors {
        match register_selector(&mut connection, protocol, selector, state).await {
            Ok(()) => registered += 1,
            Err(error) => {
                warn!(%error, selector = selector.selector(), "could not register selector");
            }
        }
    }
    if options.selectors.is_empty() || registered == 0 {
        if !options.selectors.is_empty() {
            warn!("no selector registered, requesting uni-station mode");
        }
        arm_data(&mut connection, protocol, None).await.map_err(|error| {
            PipelineError::Fatal(format!("uni-station setup failed: {error}"))
        })?;
    }

    // END starts binary streaming with no text response.
    connection.send_command(&Command::End, protocol).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                connection.send_command(&Command::Bye, protocol).await.ok();
                connection.shutdown().await.ok();
                return Ok(SessionEnd::Cancelled);
            }
            frame = connection.read_frame(protocol) => match frame {
                Ok(frame) => handle_frame(frame, options, callback, state, forwarded),
                Err(PipelineError::Disconnected) => return Ok(SessionEnd::Disconnected),
                Err(PipelineError::Timeout(timeout)) => {
                    warn!(?timeout, "no data within the network timeout, resetting connection");
                    return Ok(SessionEnd::Disconnected);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

async fn register_selector(
    connection: &mut SlConnection,
    protocol: ProtocolVersion,
    selector: &StreamSelector,
    state: &StateStore,
) -> Result<()> {
    let network = selector.network()?.to_owned();
    let station = selector.station().to_owned();
    info!(
        station_id = %selector.station_id()?,
        selector = selector.selector(),
        "adding stream subscription"
    );

    connection
        .send_command(
            &Command::Station {
                station: station.clone(),
                network: network.clone(),
            },
            protocol,
        )
        .await?;
    read_ok(connection, "STATION").await?;

    connection
        .send_command(
            &Command::Select {
                pattern: selector.selector().to_owned(),
            },
            protocol,
        )
        .await?;
    read_ok(connection, "SELECT").await?;

    arm_data(connection, protocol, state.cursor(&network, &station)).await
}

/// Send DATA, resuming just after `cursor` when one is known.
async fn arm_data(
    connection: &mut SlConnection,
    protocol: ProtocolVersion,
    cursor: Option<ringbridge_protocol::SequenceNumber>,
) -> Result<()> {
    if let Some(sequence) = cursor {
        debug!(%sequence, "resuming from sequence");
    }
    connection
        .send_command(&Command::Data { sequence: cursor }, protocol)
        .await?;
    read_ok(connection, "DATA").await
}

async fn read_ok(connection: &mut SlConnection, command: &str) -> Result<()> {
    let line = connection.read_line().await?;
    match Response::parse_line(&line)? {
        Response::Ok => Ok(()),
        Response::Error { description } => Err(PipelineError::ServerError(format!(
            "{command}: {description}"
        ))),
        Response::Hello { .. } => Err(PipelineError::UnexpectedResponse(format!(
            "expected OK for {command}, got: {line:?}"
        ))),
    }
}

fn handle_frame(
    frame: OwnedFrame,
    options: &SeedLinkOptions,
    callback: &PacketCallback,
    state: &mut StateStore,
    forwarded: &mut u64,
) {
    if !frame.payload_format().is_mseed() {
        trace!(sequence = %frame.sequence(), "discarding non-miniSEED payload");
        return;
    }
    trace!(sequence = %frame.sequence(), "frame received");

    if let Some(key) = frame.station_key() {
        state.track(key, frame.sequence());
    }

    match unpack_packets(frame.payload()) {
        Ok(packets) => {
            if packets.len() > 1 {
                warn!(count = packets.len(), "multiple miniSEED records in one frame");
            } else if packets.is_empty() {
                warn!("no miniSEED records unpacked from frame");
            }
            for packet in packets {
                if let Err(error) = callback(packet) {
                    warn!(%error, "failed to propagate packet");
                }
                *forwarded += 1;
                if state.enabled()
                    && options.state_file_update_interval > 0
                    && forwarded.is_multiple_of(u64::from(options.state_file_update_interval))
                {
                    state.persist();
                }
            }
        }
        Err(error) => warn!(%error, "skipping packet, unpacking failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSeedLinkConfig, MockSeedLinkServer};
    use ringbridge_protocol::{Compression, SelectorKind, SequenceNumber};
    use std::sync::Mutex;

    fn collector() -> (PacketCallback, Arc<Mutex<Vec<Packet>>>) {
        let collected: Arc<Mutex<Vec<Packet>>> = Arc::default();
        let sink = Arc::clone(&collected);
        let callback: PacketCallback = Arc::new(move |packet| {
            sink.lock().unwrap().push(packet);
            Ok(())
        });
        (callback, collected)
    }

    fn encoded_record(station: &str, samples: Vec<i32>) -> Vec<u8> {
        let id = StreamIdentifier::from_parts("UU", station, "HHN", "01").unwrap();
        let mut packet = Packet::new();
        packet.set_identifier(id).unwrap();
        packet.set_sampling_rate(100.0).unwrap();
        packet.set_start_time_ns(1_759_952_887_000_000_000);
        packet.set_samples(Samples::Int32(samples));
        mseed::to_datalink_payloads(&packet, 512, false, Compression::None)
            .unwrap()
            .remove(0)
            .data
    }

    fn v3_frame(sequence: u64, record: &[u8]) -> Vec<u8> {
        ringbridge_protocol::frame::v3::write(SequenceNumber::new(sequence), record).unwrap()
    }

    fn options_for(server: &MockSeedLinkServer) -> SeedLinkOptions {
        let address = server.addr();
        SeedLinkOptions {
            host: address.ip().to_string(),
            port: address.port(),
            network_reconnect_delay: Duration::from_millis(20),
            prefer_v4: false,
            ..SeedLinkOptions::default()
        }
    }

    #[test]
    fn unpack_single_record() {
        let record = encoded_record("FTU", vec![1, 2, 3, -4]);
        let packets = unpack_packets(&record).unwrap();
        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert_eq!(packet.identifier().unwrap().canonical().unwrap(), "UU.FTU.HHN.01");
        assert_eq!(packet.samples().unwrap(), &Samples::Int32(vec![1, 2, 3, -4]));
    }

    #[test]
    fn unpack_walks_multiple_records() {
        let mut span = encoded_record("FTU", vec![1, 2]);
        span.extend(encoded_record("CTU", vec![3, 4]));
        let packets = unpack_packets(&span).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].identifier().unwrap().station().unwrap(), "CTU");
    }

    #[test]
    fn unpack_maps_blank_location() {
        let id = StreamIdentifier::from_parts("GE", "WLF", "BHZ", "").unwrap();
        let mut packet = Packet::new();
        packet.set_identifier(id).unwrap();
        packet.set_sampling_rate(20.0).unwrap();
        packet.set_start_time_ns(1_700_000_000_000_000_000);
        packet.set_samples(Samples::Int32(vec![7]));
        let record = mseed::to_datalink_payloads(&packet, 512, false, Compression::None)
            .unwrap()
            .remove(0)
            .data;

        let packets = unpack_packets(&record).unwrap();
        assert_eq!(
            packets[0].identifier().unwrap().location_code().unwrap(),
            "--"
        );
    }

    #[test]
    fn unpack_rejects_garbage_span() {
        let err = unpack_packets(&[0x13u8; 600]).unwrap_err();
        assert!(matches!(err, PipelineError::Protocol(_)));
    }

    #[test]
    fn duplicate_selectors_rejected() {
        let mut options = SeedLinkOptions::default();
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_selector("HH?", "", SelectorKind::Data);
        options.add_selector(selector.clone()).unwrap();
        assert!(options.add_selector(selector).is_err());
        assert_eq!(options.selectors.len(), 1);
    }

    #[tokio::test]
    async fn streams_packets_to_callback() {
        let record = encoded_record("FTU", vec![1, 2, 3, -4]);
        let config = MockSeedLinkConfig {
            frames: vec![v3_frame(1, &record)],
            ..MockSeedLinkConfig::v3_default()
        };
        let server = MockSeedLinkServer::start(config).await;

        let (callback, collected) = collector();
        let mut options = options_for(&server);
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_station("FTU").unwrap();
        selector.set_selector("HH?", "", SelectorKind::Data);
        options.add_selector(selector).unwrap();

        let source = SeedLinkSource::new(callback, options).unwrap();
        let handle = source.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while collected.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("packet never arrived");

        source.stop();
        handle.await.unwrap().unwrap();

        let packets = collected.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(
            packets[0].identifier().unwrap().canonical().unwrap(),
            "UU.FTU.HHN.01"
        );

        let commands = server.captured().connection(0);
        assert_eq!(commands[0], "HELLO");
        assert_eq!(commands[1], "STATION FTU UU");
        assert_eq!(commands[2], "SELECT ??HH?.D");
        assert_eq!(commands[3], "DATA");
        assert_eq!(commands[4], "END");
    }

    #[tokio::test]
    async fn resumes_from_state_file_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("seedlink.state");
        std::fs::write(&state_path, "UU FTU 11\n").unwrap();

        let record = encoded_record("FTU", vec![5]);
        let config = MockSeedLinkConfig {
            frames: vec![v3_frame(12, &record)],
            ..MockSeedLinkConfig::v3_default()
        };
        let server = MockSeedLinkServer::start(config).await;

        let (callback, collected) = collector();
        let mut options = options_for(&server);
        options.state_file = Some(state_path.clone());
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_station("FTU").unwrap();
        options.add_selector(selector).unwrap();

        let source = SeedLinkSource::new(callback, options).unwrap();
        let handle = source.start().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while collected.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("packet never arrived");
        source.stop();
        handle.await.unwrap().unwrap();

        // DATA was replayed with the recovered cursor, v3 hex-rendered.
        let commands = server.captured().connection(0);
        assert!(commands.contains(&"DATA 00000B".to_owned()), "{commands:?}");

        // Clean shutdown persisted the newest sequence.
        let contents = std::fs::read_to_string(&state_path).unwrap();
        assert!(contents.contains("UU FTU 12"), "{contents:?}");
    }

    #[tokio::test]
    async fn reconnects_after_server_close() {
        let first = encoded_record("FTU", vec![1]);
        let second = encoded_record("FTU", vec![2]);
        let config = MockSeedLinkConfig {
            connection_frames: Some(vec![
                vec![v3_frame(1, &first)],
                vec![v3_frame(2, &second)],
            ]),
            close_after_stream: true,
            max_connections: 2,
            ..MockSeedLinkConfig::v3_default()
        };
        let server = MockSeedLinkServer::start(config).await;

        let (callback, collected) = collector();
        let mut options = options_for(&server);
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_station("FTU").unwrap();
        options.add_selector(selector).unwrap();

        let source = SeedLinkSource::new(callback, options).unwrap();
        let handle = source.start().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while collected.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second connection never delivered");
        source.stop();
        handle.await.unwrap().unwrap();

        // The reconnect armed DATA with the tracked sequence.
        let commands = server.captured().connection(1);
        assert!(commands.contains(&"DATA 000001".to_owned()), "{commands:?}");
    }

    #[tokio::test]
    async fn server_error_on_every_selector_is_fatal_without_unistation() {
        let config = MockSeedLinkConfig {
            reject_station: true,
            reject_data: true,
            ..MockSeedLinkConfig::v3_default()
        };
        let server = MockSeedLinkServer::start(config).await;

        let (callback, _collected) = collector();
        let mut options = options_for(&server);
        let mut selector = StreamSelector::new();
        selector.set_network("XX").unwrap();
        options.add_selector(selector).unwrap();

        let source = SeedLinkSource::new(callback, options).unwrap();
        let handle = source.start().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should exit")
            .unwrap();
        assert!(matches!(result.unwrap_err(), PipelineError::Fatal(_)));
    }
}
