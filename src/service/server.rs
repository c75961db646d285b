use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use super::interface::MonitorService;
use super::protocol::{decode_request, encode, ServerMessage, MAX_REQUEST_LINE};
use crate::error::Error;
use crate::monitor::{Notification, ShutdownReason};

/// Outbound messages buffered per client before the reader waits
const OUTBOUND_CAPACITY: usize = 32;

/// Listening socket of the monitor
pub struct Server {
    listener: UnixListener,
    path: PathBuf,
}

impl Server {
    /// Bind the socket, replacing a stale file left by a previous run
    pub fn bind(path: &Path, mode: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }
        if path.exists() {
            tracing::debug!("removing stale socket {:?}", path);
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {:?}", path))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind socket: {:?}", path))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set socket permissions: {:?}", path))?;

        tracing::info!("listening on {:?}", path);
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept clients until a shutdown reason arrives, then remove the socket
    pub async fn run(
        self,
        service: Arc<MonitorService>,
        mut shutdown: mpsc::Receiver<ShutdownReason>,
    ) -> ShutdownReason {
        let reason = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(service, stream).await {
                                tracing::debug!(error = %e, "client connection ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                reason = shutdown.recv() => {
                    // every sender gone means nothing can ask us to stop anymore
                    break reason.unwrap_or(ShutdownReason::Quit);
                }
            }
        };

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(error = %e, "failed to remove socket {:?}", self.path);
        }
        reason
    }
}

async fn handle_client(service: Arc<MonitorService>, stream: UnixStream) -> Result<(), Error> {
    let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
    tracing::debug!(?peer_uid, "client connected");

    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_messages(writer, out_rx));
    let forwarder = tokio::spawn(forward_signals(service.subscribe(), out_tx.clone()));

    let _ = out_tx.send(ServerMessage::hello()).await;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let result = loop {
        line.clear();
        match read_request_line(&mut reader, &mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(Error::Io(e)),
        }
        if line.trim().is_empty() {
            continue;
        }

        let oversized = !line.ends_with('\n') && line.len() > MAX_REQUEST_LINE;
        let reply = match decode_request(&line) {
            Ok(request) => service.handle(request, peer_uid).await,
            Err(e) => ServerMessage::error(e),
        };
        if out_tx.send(reply).await.is_err() {
            break Ok(());
        }
        // the rest of an oversized line cannot be resynchronized
        if oversized {
            break Err(Error::Protocol("request line too long".to_string()));
        }
    };

    forwarder.abort();
    drop(out_tx);
    let _ = writer_task.await;
    tracing::debug!(?peer_uid, "client disconnected");
    result
}

/// Read one line, stopping after `MAX_REQUEST_LINE + 1` bytes so a full-size request keeps its newline
async fn read_request_line<R>(reader: &mut R, line: &mut String) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(MAX_REQUEST_LINE as u64 + 1);
    limited.read_line(line).await
}

async fn write_messages(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = rx.recv().await {
        let bytes = match encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode message");
                continue;
            }
        };
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

async fn forward_signals(
    mut updates: broadcast::Receiver<Notification>,
    out: mpsc::Sender<ServerMessage>,
) {
    loop {
        match updates.recv().await {
            Ok(notification) => {
                if out.send(ServerMessage::signal(&notification)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "slow client missed signals");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
