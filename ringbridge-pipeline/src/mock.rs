//! In-process mock servers for exercising the pipeline over real sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use ringbridge_protocol::datalink;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct MockSeedLinkConfig {
    pub hello_line1: String,
    pub hello_line2: String,
    /// Frames streamed after END on every connection.
    pub frames: Vec<Vec<u8>>,
    /// Per-connection overrides; connections beyond the list fall back to
    /// `frames`.
    pub connection_frames: Option<Vec<Vec<Vec<u8>>>>,
    pub accept_slproto: bool,
    pub close_after_stream: bool,
    pub max_connections: usize,
    pub reject_station: bool,
    pub reject_data: bool,
}

impl MockSeedLinkConfig {
    pub fn v3_default() -> Self {
        Self {
            hello_line1: "SeedLink v3.1 (2020.075)".to_owned(),
            hello_line2: "Mock Server".to_owned(),
            frames: Vec::new(),
            connection_frames: None,
            accept_slproto: false,
            close_after_stream: false,
            max_connections: 1,
            reject_station: false,
            reject_data: false,
        }
    }
}

/// Commands captured per connection, in arrival order.
#[derive(Clone, Default)]
pub struct CapturedCommands(Arc<Mutex<Vec<Vec<String>>>>);

impl CapturedCommands {
    pub fn connection(&self, index: usize) -> Vec<String> {
        self.0.lock().unwrap().get(index).cloned().unwrap_or_default()
    }

    fn start_connection(&self) {
        self.0.lock().unwrap().push(Vec::new());
    }

    fn push(&self, command: String) {
        if let Some(last) = self.0.lock().unwrap().last_mut() {
            last.push(command);
        }
    }
}

pub struct MockSeedLinkServer {
    addr: SocketAddr,
    captured: CapturedCommands,
}

impl MockSeedLinkServer {
    pub async fn start(config: MockSeedLinkConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = CapturedCommands::default();

        let captured_for_task = captured.clone();
        tokio::spawn(async move {
            let config = Arc::new(config);
            for connection_index in 0..config.max_connections {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                captured_for_task.start_connection();
                handle_seedlink_connection(stream, &config, &captured_for_task, connection_index)
                    .await;
            }
        });

        Self { addr, captured }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn captured(&self) -> &CapturedCommands {
        &self.captured
    }
}

async fn handle_seedlink_connection(
    stream: TcpStream,
    config: &MockSeedLinkConfig,
    captured: &CapturedCommands,
    connection_index: usize,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let frames = config
        .connection_frames
        .as_ref()
        .and_then(|frames| frames.get(connection_index))
        .unwrap_or(&config.frames);

    loop {
        line.clear();
        let Ok(n) = reader.read_line(&mut line).await else {
            break;
        };
        if n == 0 {
            break;
        }
        let trimmed = line.trim().to_uppercase();
        captured.push(trimmed.clone());

        if trimmed == "HELLO" {
            let banner = format!("{}\r\n{}\r\n", config.hello_line1, config.hello_line2);
            if write_half.write_all(banner.as_bytes()).await.is_err() {
                break;
            }
        } else if trimmed.starts_with("SLPROTO") {
            let reply: &[u8] = if config.accept_slproto {
                b"OK\r\n"
            } else {
                b"ERROR unsupported command\r\n"
            };
            if write_half.write_all(reply).await.is_err() {
                break;
            }
        } else if trimmed.starts_with("STATION") {
            let reply: &[u8] = if config.reject_station {
                b"ERROR no such station\r\n"
            } else {
                b"OK\r\n"
            };
            if write_half.write_all(reply).await.is_err() {
                break;
            }
        } else if trimmed.starts_with("SELECT") {
            if write_half.write_all(b"OK\r\n").await.is_err() {
                break;
            }
        } else if trimmed == "DATA" || trimmed.starts_with("DATA ") {
            let reply: &[u8] = if config.reject_data {
                b"ERROR arguments\r\n"
            } else {
                b"OK\r\n"
            };
            if write_half.write_all(reply).await.is_err() {
                break;
            }
        } else if trimmed == "END" {
            for frame in frames {
                if write_half.write_all(frame).await.is_err() {
                    break;
                }
            }
            if write_half.flush().await.is_err() || config.close_after_stream {
                break;
            }
        } else if trimmed == "BYE" {
            let _ = write_half.shutdown().await;
            break;
        }
        let _ = write_half.flush().await;
    }
}

/// One captured DataLink WRITE.
#[derive(Clone, Debug)]
pub struct CapturedWrite {
    pub stream_id: String,
    pub start_us: i64,
    pub end_us: i64,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct DataLinkState {
    writes: Vec<CapturedWrite>,
    client_names: Vec<String>,
}

pub struct MockDataLinkServer {
    addr: SocketAddr,
    state: Arc<Mutex<DataLinkState>>,
}

impl MockDataLinkServer {
    pub async fn start(max_connections: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state: Arc<Mutex<DataLinkState>> = Arc::default();

        let state_for_task = Arc::clone(&state);
        tokio::spawn(async move {
            for _ in 0..max_connections {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                handle_datalink_connection(stream, &state_for_task).await;
            }
        });

        Self { addr, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn writes(&self) -> Vec<CapturedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn client_names(&self) -> Vec<String> {
        self.state.lock().unwrap().client_names.clone()
    }
}

async fn handle_datalink_connection(stream: TcpStream, state: &Arc<Mutex<DataLinkState>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut preheader = [0u8; datalink::PREHEADER_LEN];
        if reader.read_exact(&mut preheader).await.is_err() {
            break;
        }
        let Ok(header_len) = datalink::parse_preheader(&preheader) else {
            break;
        };
        let mut header = vec![0u8; header_len];
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }
        let header = String::from_utf8_lossy(&header).into_owned();
        let mut parts = header.split_whitespace();

        match parts.next() {
            Some("ID") => {
                let client = header[2..].trim().to_owned();
                state.lock().unwrap().client_names.push(client);
                let reply = b"ID DataLink 2020.075 :: DLPROTO:1.0 PACKETSIZE:512 WRITE";
                let mut frame = Vec::with_capacity(3 + reply.len());
                frame.extend_from_slice(b"DL");
                frame.push(reply.len() as u8);
                frame.extend_from_slice(reply);
                if write_half.write_all(&frame).await.is_err()
                    || write_half.flush().await.is_err()
                {
                    break;
                }
            }
            Some("WRITE") => {
                let stream_id = parts.next().unwrap_or_default().to_owned();
                let start_us: i64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let end_us: i64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let _flags = parts.next();
                let size: usize = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let mut payload = vec![0u8; size];
                if reader.read_exact(&mut payload).await.is_err() {
                    break;
                }
                state.lock().unwrap().writes.push(CapturedWrite {
                    stream_id,
                    start_us,
                    end_us,
                    payload,
                });
            }
            Some("KEEPALIVE") => {}
            _ => break,
        }
    }
}
