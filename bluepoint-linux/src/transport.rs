//! Push transport: TCP client that offers one file to one peer and reports the outcome.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bluepoint_core::wire::{read_frame, write_frame, FrameIoError};
use bluepoint_core::{Message, Outcome, Peer, Transfer};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Offer -> verdict -> payload -> completion over a fresh TCP connection per push.
#[derive(Debug, Clone)]
pub struct TcpPush {
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
enum PushError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameIoError),
    #[error("unexpected reply {0}")]
    Unexpected(String),
    #[error("payload truncated: sent {sent} of {expected} bytes")]
    Truncated { sent: u64, expected: u64 },
}

impl TcpPush {
    pub fn new(connect_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            transfer_timeout,
        }
    }

    async fn push(&self, addr: SocketAddr, media: &Path) -> Result<Outcome, PushError> {
        let mut file = File::open(media).await?;
        let length = file.metadata().await?.len();
        let file_name = media
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PushError::ConnectTimeout)??;
        write_frame(&mut stream, &Message::Offer { file_name, length }).await?;
        match read_frame(&mut stream).await? {
            Message::Verdict { accept: true } => {}
            Message::Verdict { accept: false } => return Ok(Outcome::Refused),
            other => return Err(PushError::Unexpected(format!("{other:?}"))),
        }

        let sent = tokio::io::copy(&mut file, &mut stream).await?;
        if sent != length {
            return Err(PushError::Truncated {
                sent,
                expected: length,
            });
        }
        stream.flush().await?;
        match read_frame(&mut stream).await? {
            Message::Complete { ok: true } => Ok(Outcome::Accepted),
            Message::Complete { ok: false } => Ok(Outcome::Failed),
            other => Err(PushError::Unexpected(format!("{other:?}"))),
        }
    }
}

#[async_trait]
impl Transfer for TcpPush {
    async fn send(&self, peer: &Peer, media: &Path) -> Outcome {
        let addr = SocketAddr::new(peer.host, peer.channel);
        match timeout(self.transfer_timeout, self.push(addr, media)).await {
            Ok(Ok(outcome)) => {
                debug!(peer = %peer.id, %addr, %outcome, "push answered");
                outcome
            }
            Ok(Err(e)) => {
                warn!(peer = %peer.id, %addr, error = %e, "push failed");
                Outcome::Failed
            }
            Err(_) => {
                warn!(peer = %peer.id, %addr, "push timed out");
                Outcome::Failed
            }
        }
    }
}
