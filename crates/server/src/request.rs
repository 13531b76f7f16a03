//! Inbound request head parsing and routing.
//!
//! Only the request line and header block are read. Bodies are never
//! consumed: GET is assumed to carry none and CONNECT hands the stream to
//! the tunnel as-is.

use burrow_core::Headers;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::ProxyError;

/// Parsed request line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
}

/// Where a session goes after its head has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// CONNECT: relay raw bytes to `authority` (`host:port`).
    Tunnel { authority: String },
    /// GET: serve `url` from cache or origin.
    Fetch { url: String },
}

/// Read a request head.
///
/// Returns `Ok(None)` when the peer closed before sending anything.
/// Header lines without a colon are skipped; no limits are enforced on
/// header count or size.
pub async fn read_request_head<R>(reader: &mut R) -> Result<Option<RequestHead>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }

    let request_line = String::from_utf8_lossy(&line);
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(ProxyError::MalformedRequest(format!(
            "expected method, target and version, got {} tokens",
            parts.len()
        )));
    };
    let (method, target, version) = (method.to_string(), target.to_string(), version.to_string());

    let mut headers = Headers::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }
        if let Some((name, value)) = text.split_once(':') {
            headers.append(name.trim(), value.trim());
        }
    }

    Ok(Some(RequestHead { method, target, version, headers }))
}

impl RequestHead {
    /// Absolute targets are used verbatim; origin-form targets are joined
    /// to the `Host` header, which may be missing and yield an empty
    /// authority. That surfaces later as a fetch failure.
    pub fn effective_url(&self) -> String {
        let lower = self.target.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.target.clone()
        } else {
            format!("http://{}{}", self.headers.get("Host").unwrap_or(""), self.target)
        }
    }

    pub fn route(&self) -> Result<Route, ProxyError> {
        if self.method.eq_ignore_ascii_case("CONNECT") {
            Ok(Route::Tunnel { authority: self.target.clone() })
        } else if self.method.eq_ignore_ascii_case("GET") {
            Ok(Route::Fetch { url: self.effective_url() })
        } else {
            Err(ProxyError::MethodNotAllowed(self.method.clone()))
        }
    }
}
