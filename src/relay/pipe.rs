//! Bidirectional Relay
//!
//! One direction runs on a spawned task, the other on the caller. Every read
//! re-arms the idle deadline. When either direction stops, the other one is
//! cancelled so the pair always ends together.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::debug;

use super::RelaySession;
use crate::error::timed_out;
use crate::protocol::constants::SOCKET_BUF_SIZE;

/// Copy bytes between `client` and `target` until either direction ends.
///
/// Returns the outcome of whichever direction finished first. End of stream
/// counts as success; an idle direction fails with `TimedOut`. A zero
/// `idle_timeout` leaves reads unbounded.
pub async fn pipe<A, B>(
    client: A,
    target: B,
    idle_timeout: Duration,
    session: Arc<RelaySession>,
) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_r, client_w) = tokio::io::split(client);
    let (target_r, target_w) = tokio::io::split(target);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let downstream = {
        let session = session.clone();
        let stop_tx = stop_tx.clone();
        let stop_rx = stop_rx.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = copy_direction(target_r, client_w, idle_timeout, stop_rx, |n| {
                session.add_bytes_down(n)
            })
            .await;
            let _ = done_tx.send(result);
            let _ = stop_tx.send(true);
        })
    };

    let result = copy_direction(client_r, target_w, idle_timeout, stop_rx, |n| {
        session.add_bytes_up(n)
    })
    .await;
    let _ = done_tx.send(result);
    let _ = stop_tx.send(true);

    if let Err(e) = downstream.await {
        debug!("Downstream relay task for {} ended abnormally: {}", session.session_id, e);
    }

    done_rx.recv().await.unwrap_or(Ok(()))
}

async fn copy_direction<R, W, F>(
    mut reader: R,
    mut writer: W,
    idle_timeout: Duration,
    mut stop: watch::Receiver<bool>,
    on_bytes: F,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let mut buf = vec![0u8; SOCKET_BUF_SIZE];
    loop {
        let step = async {
            let n = read_with_deadline(&mut reader, &mut buf, idle_timeout).await?;
            if n > 0 {
                writer.write_all(&buf[..n]).await?;
            }
            Ok::<usize, io::Error>(n)
        };

        let n = tokio::select! {
            res = step => res?,
            _ = stop.changed() => {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "relay closed by the opposite direction",
                ));
            }
        };

        if n == 0 {
            return Ok(());
        }
        on_bytes(n as u64);
    }
}

async fn read_with_deadline<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Duration,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    if idle_timeout.is_zero() {
        return reader.read(buf).await;
    }
    match timeout(idle_timeout, reader.read(buf)).await {
        Ok(result) => result,
        Err(_) => Err(timed_out("relay read")),
    }
}
