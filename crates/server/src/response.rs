//! HTTP/1.1 response framing toward the client.
//!
//! Responses are always fully buffered with an explicit `Content-Length`;
//! chunked transfer coding is never emitted.

use burrow_core::Headers;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

/// Reply sent once a CONNECT dial succeeds.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Drop `Transfer-Encoding` and set `Content-Length` to the body size,
/// keeping the position of an existing `Content-Length` header.
pub fn frame_headers(headers: &mut Headers, body_len: usize) {
    headers.remove("Transfer-Encoding");
    headers.insert("Content-Length", body_len.to_string());
}

/// Reason phrase for statuses replayed from cache.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Write a complete response in one buffer.
pub async fn write_response<W>(writer: &mut W, status: u16, reason: &str, headers: &Headers, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let mut buf = Vec::with_capacity(head.len() + body.len());
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(body);

    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Report `err` to the client. Errors without a status write nothing.
pub async fn write_error<W>(writer: &mut W, err: &ProxyError) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some((status, reason)) = err.status() else {
        return Ok(());
    };

    let body = err.body();
    let mut headers = Headers::new();
    if !body.is_empty() {
        headers.append("Content-Type", "text/plain; charset=utf-8");
    }
    headers.append("Content-Length", body.len().to_string());
    headers.append("Connection", "close");

    write_response(writer, status, reason, &headers, body.as_bytes()).await
}
