//! Unix socket relay transport.
//!
//! The daemon listens on a socket; each capturing process connects once and
//! streams envelopes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐  Unix Socket  ┌──────────────────────────┐
//! │   Capturing process      │──────────────►│   fixonce-relay run      │
//! │  ┌──────────────────┐    │     JSON      │  ┌──────────────────┐    │
//! │  │  PageRelay       │    │               │  │ RelaySocketServer│    │
//! │  │  (connect)       │    │               │  │  (one task per   │    │
//! │  └──────────────────┘    │               │  │   connection)    │    │
//! └──────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! # Message Framing
//!
//! ```text
//! [4 bytes: frame length (big-endian u32)]
//! [N bytes: JSON envelope]
//! ```
//!
//! A frame that is not valid JSON, or not a valid envelope, is dropped and
//! the connection stays up. A length prefix over [`MAX_FRAME_SIZE`] closes
//! the connection, since the stream can no longer be trusted.

use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::channel::{PageRelay, DEFAULT_RELAY_CAPACITY};
use super::error::{RelayError, RelayResult};
use super::protocol::{accept, RelayMessage};

/// Largest accepted frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Daemon-side listener.
pub struct RelaySocketServer {
    /// Std listener so binding works outside a runtime. Taken in `serve`.
    listener: Option<StdUnixListener>,
    socket_path: PathBuf,
}

impl RelaySocketServer {
    /// Bind at `socket_path`, replacing a stale socket file.
    pub fn bind<P: AsRef<Path>>(socket_path: P) -> RelayResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let listener = StdUnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        info!("Relay socket listening on {:?}", socket_path);

        Ok(Self {
            listener: Some(listener),
            socket_path,
        })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` flips to `true` or its sender is
    /// dropped. Accepted messages go to `tx`; a full `tx` drops them.
    pub async fn serve(
        mut self,
        tx: mpsc::Sender<RelayMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RelayResult<()> {
        let std_listener = self
            .listener
            .take()
            .ok_or_else(|| io::Error::other("listener already consumed"))?;
        let listener = UnixListener::from_std(std_listener)?;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            debug!("Relay client connected");
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = read_connection(stream, tx).await
                                    && !matches!(e, RelayError::ConnectionClosed)
                                {
                                    warn!("Relay connection error: {}", e);
                                }
                                debug!("Relay connection finished");
                            });
                        }
                        Err(e) => error!("Relay accept failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Relay socket shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for RelaySocketServer {
    fn drop(&mut self) {
        if self.socket_path.exists()
            && let Err(e) = std::fs::remove_file(&self.socket_path)
        {
            warn!("Failed to remove relay socket file: {}", e);
        }
    }
}

/// Connect to a daemon and return a relay that writes to it.
///
/// A background task owns the stream; once it fails the relay reports
/// closed and drops further posts.
pub async fn connect<P: AsRef<Path>>(socket_path: P) -> RelayResult<PageRelay> {
    let socket_path = socket_path.as_ref();
    let stream = UnixStream::connect(socket_path).await?;
    debug!("Connected to relay socket at {:?}", socket_path);

    let (tx, rx) = mpsc::channel(DEFAULT_RELAY_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = write_connection(stream, rx).await
            && !matches!(e, RelayError::ConnectionClosed)
        {
            debug!("Relay writer stopped: {}", e);
        }
    });

    Ok(PageRelay::from_sender(tx))
}

async fn read_connection(mut stream: UnixStream, tx: mpsc::Sender<RelayMessage>) -> RelayResult<()> {
    loop {
        let data = read_frame(&mut stream).await?;
        let raw: Value = match serde_json::from_slice(&data) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Dropping malformed relay frame: {}", e);
                continue;
            }
        };
        let Some(msg) = accept(raw) else {
            continue;
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Relay backlog full, dropping message"),
            Err(TrySendError::Closed(_)) => return Ok(()),
        }
    }
}

async fn write_connection(mut stream: UnixStream, mut rx: mpsc::Receiver<Value>) -> RelayResult<()> {
    while let Some(value) = rx.recv().await {
        let data = serde_json::to_vec(&value)?;
        match write_frame(&mut stream, &data).await {
            Err(RelayError::FrameTooLarge(len, max)) => {
                debug!("Dropping relay frame of {} bytes (max {})", len, max);
            }
            other => other?,
        }
    }
    Ok(())
}

/// Read one length-prefixed frame.
pub(crate) async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> RelayResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(RelayError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(RelayError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> RelayResult<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(RelayError::FrameTooLarge(data.len(), MAX_FRAME_SIZE));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}
