use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{HandlerSlot, SyncChannel, SyncEvent, SyncFrame, SyncHandler, Subscription};
use crate::credentials::store::runtime_dir;
use crate::error::ClientError;

const SOCKET_DIR: &str = "devobot";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const RECONNECT_JITTER_MS: u128 = 1_000;
const CHANNEL_CAPACITY: usize = 256;

/// Named channel shared by every process of the login session.
///
/// Backed by a Unix socket `{runtime_dir}/devobot/{name}.sock`. Whichever
/// process finds no live socket binds it and relays each newline-delimited
/// frame to all connections; everyone else connects. If the relaying process
/// goes away the remaining endpoints reconnect and one of them takes over.
pub struct SocketSyncChannel {
    origin: String,
    socket_path: PathBuf,
    outgoing: mpsc::UnboundedSender<String>,
    incoming: broadcast::Sender<SyncEvent>,
    slot: HandlerSlot,
}

impl SocketSyncChannel {
    /// Join the named channel under the session runtime directory
    pub async fn open(name: &str) -> Result<Self, ClientError> {
        let dir = runtime_dir().join(SOCKET_DIR);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ClientError::SyncChannel(format!("failed to create {}: {}", dir.display(), e)))?;
        Self::open_at(dir.join(format!("{}.sock", name))).await
    }

    /// Join the channel served at an explicit socket path
    pub async fn open_at(socket_path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let socket_path = socket_path.into();
        let stream = open_stream(&socket_path).await?;

        let origin = Uuid::new_v4().to_string();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming, _) = broadcast::channel(CHANNEL_CAPACITY);

        tokio::spawn(run_endpoint(
            socket_path.clone(),
            origin.clone(),
            stream,
            outgoing_rx,
            incoming.clone(),
        ));

        Ok(Self {
            origin,
            socket_path,
            outgoing,
            incoming,
            slot: HandlerSlot::default(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl SyncChannel for SocketSyncChannel {
    fn publish(&self, event: SyncEvent) -> Result<(), ClientError> {
        let frame = SyncFrame {
            origin: self.origin.clone(),
            event,
        };
        let line = serde_json::to_string(&frame)?;
        self.outgoing
            .send(line)
            .map_err(|_| ClientError::SyncChannel("sync connection closed".to_string()))
    }

    fn subscribe(&self, handler: SyncHandler) -> Subscription {
        self.slot.install(self.incoming.subscribe(), handler)
    }
}

fn sync_error(action: &str, path: &Path, err: std::io::Error) -> ClientError {
    ClientError::SyncChannel(format!("failed to {} {}: {}", action, path.display(), err))
}

/// Connect to the relay, becoming the relay if nobody serves the socket
async fn open_stream(path: &Path) -> Result<UnixStream, ClientError> {
    if let Ok(stream) = UnixStream::connect(path).await {
        return Ok(stream);
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            // Either another process bound it a moment ago or the file is stale
            if let Ok(stream) = UnixStream::connect(path).await {
                return Ok(stream);
            }
            debug!(path = %path.display(), "Removing stale sync socket");
            let _ = std::fs::remove_file(path);
            match UnixListener::bind(path) {
                Ok(listener) => listener,
                // Lost the rebind to a peer that removed the same stale file
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    return UnixStream::connect(path)
                        .await
                        .map_err(|e| sync_error("connect to", path, e));
                }
                Err(e) => return Err(sync_error("bind", path, e)),
            }
        }
        Err(e) => return Err(sync_error("bind", path, e)),
    };

    debug!(path = %path.display(), "Serving sync channel");
    tokio::spawn(relay(listener));

    UnixStream::connect(path)
        .await
        .map_err(|e| sync_error("connect to", path, e))
}

async fn relay(listener: UnixListener) {
    let (tx, _) = broadcast::channel::<String>(CHANNEL_CAPACITY);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let rx = tx.subscribe();
                tokio::spawn(relay_connection(stream, tx.clone(), rx));
            }
            Err(e) => {
                warn!(error = %e, "Sync relay stopped accepting connections");
                break;
            }
        }
    }
}

async fn relay_connection(
    stream: UnixStream,
    tx: broadcast::Sender<String>,
    mut rx: broadcast::Receiver<String>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let _ = tx.send(line);
                }
                Ok(None) | Err(_) => break,
            },
            frame = rx.recv() => match frame {
                Ok(line) => {
                    if write_line(&mut write, &line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Sync relay connection lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn write_line(write: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await
}

/// Reconnect backoff with up to a second of jitter
fn reconnect_delay() -> Duration {
    let jitter = (Uuid::new_v4().as_u128() % RECONNECT_JITTER_MS) as u64;
    RECONNECT_DELAY + Duration::from_millis(jitter)
}

/// Pump frames between this endpoint and the relay until the endpoint is dropped
async fn run_endpoint(
    socket_path: PathBuf,
    origin: String,
    first: UnixStream,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: broadcast::Sender<SyncEvent>,
) {
    let mut next = Some(first);

    loop {
        let stream = match next.take() {
            Some(stream) => stream,
            None => match open_stream(&socket_path).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Sync channel reconnect failed");
                    tokio::time::sleep(reconnect_delay()).await;
                    continue;
                }
            },
        };

        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => dispatch(&line, &origin, &incoming),
                    Ok(None) => {
                        debug!("Sync relay disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Sync channel read failed");
                        break;
                    }
                },
                frame = outgoing.recv() => match frame {
                    Some(line) => {
                        if let Err(e) = write_line(&mut write, &line).await {
                            warn!(error = %e, "Sync frame lost");
                            break;
                        }
                    }
                    None => return,
                },
            }
        }

        tokio::time::sleep(reconnect_delay()).await;
    }
}

fn dispatch(line: &str, origin: &str, incoming: &broadcast::Sender<SyncEvent>) {
    if line.trim().is_empty() {
        return;
    }

    match serde_json::from_str::<SyncFrame>(line) {
        Ok(frame) if frame.origin == origin => {}
        Ok(frame) => {
            let _ = incoming.send(frame.event);
        }
        Err(e) => {
            warn!(error = %e, line = %line, "Ignoring malformed sync frame");
        }
    }
}
