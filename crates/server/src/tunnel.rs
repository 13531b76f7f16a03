//! CONNECT tunnels: dial the target, then relay opaque bytes both ways.
//!
//! Each direction runs as its own task. Whichever direction finishes
//! first, by EOF or error, ends the tunnel: the other task is aborted and
//! both connections are dropped.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProxyError;

/// Read buffer per direction.
pub const CHUNK_SIZE: usize = 8192;

/// The direction that finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// Client stopped sending, or writing to the target failed.
    ClientClosed,
    /// Target stopped sending, or writing to the client failed.
    TargetClosed,
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_authority(authority: &str) -> Option<(&str, u16)> {
    let (host, port) = authority.rsplit_once(':')?;
    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

/// Open a TCP connection to a CONNECT target within `timeout`.
pub async fn dial(authority: &str, timeout: Duration) -> Result<TcpStream, ProxyError> {
    let failed = |reason: String| ProxyError::TunnelDial { authority: authority.to_string(), reason };

    let (host, port) = split_authority(authority).ok_or_else(|| failed("expected host:port".into()))?;

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(failed(e.to_string())),
        Err(_) => Err(failed(format!("no connection after {}ms", timeout.as_millis()))),
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
    let _ = writer.shutdown().await;
    Ok(total)
}

fn log_direction(direction: &str, result: Result<std::io::Result<u64>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(bytes)) => tracing::debug!(direction, bytes, "relay direction finished"),
        Ok(Err(e)) => tracing::debug!(direction, error = %e, "relay direction failed"),
        Err(e) => tracing::warn!(direction, error = %e, "relay task did not complete"),
    }
}

/// Relay between a client and a target until either side is done.
///
/// All four halves are dropped before this returns.
pub async fn relay<CR, CW, TR, TW>(client: (CR, CW), target: (TR, TW)) -> RelayEnd
where
    CR: AsyncRead + Unpin + Send + 'static,
    CW: AsyncWrite + Unpin + Send + 'static,
    TR: AsyncRead + Unpin + Send + 'static,
    TW: AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, client_write) = client;
    let (target_read, target_write) = target;

    let mut client_to_target = tokio::spawn(pump(client_read, target_write));
    let mut target_to_client = tokio::spawn(pump(target_read, client_write));

    let end = tokio::select! {
        result = &mut client_to_target => {
            log_direction("client_to_target", result);
            RelayEnd::ClientClosed
        }
        result = &mut target_to_client => {
            log_direction("target_to_client", result);
            RelayEnd::TargetClosed
        }
    };

    let remaining = match end {
        RelayEnd::ClientClosed => &mut target_to_client,
        RelayEnd::TargetClosed => &mut client_to_target,
    };
    remaining.abort();
    let _ = remaining.await;

    end
}
