//! Counted byte relay
//!
//! Two copy loops run concurrently; the first one to finish (EOF or error)
//! ends the relay and the other direction is dropped mid-flight.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound for half-close after the relay ends
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes moved by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Client to outbound
    pub upload: u64,
    /// Outbound to client
    pub download: u64,
}

impl Traffic {
    /// Sum of both directions
    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }
}

/// Relay between a client stream pair and an outbound connection.
///
/// `src` is the client's read side and `dst` its write side. Bytes are
/// counted as each write accepts them, so a direction that fails halfway
/// through a chunk still reports what was delivered. Each chunk is flushed
/// before the next read. Returns when either direction ends; both write
/// sides are then shut down.
pub async fn relay<O, R, W>(outbound: O, mut src: R, mut dst: W) -> Traffic
where
    O: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut out_r, mut out_w) = tokio::io::split(outbound);
    let mut traffic = Traffic::default();

    {
        let upload = copy_counted(&mut src, &mut out_w, &mut traffic.upload);
        let download = copy_counted(&mut out_r, &mut dst, &mut traffic.download);

        let (direction, result) = tokio::select! {
            r = upload => ("upload", r),
            r = download => ("download", r),
        };
        match result {
            Ok(()) => trace!("[relay] {} reached EOF", direction),
            Err(e) => debug!("[relay] {} failed: {}", direction, e),
        }
    }

    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, out_w.shutdown()).await;
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, dst.shutdown()).await;

    traffic
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut offset = 0;
        while offset < n {
            let written = writer.write(&buf[offset..n]).await?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += written;
            *counter += written as u64;
        }
        writer.flush().await?;
    }
}
