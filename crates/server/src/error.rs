//! Structured errors for proxy sessions.
//!
//! Every variant except `Io` maps to the status line the client receives
//! before its connection is closed.

use burrow_core::Error;

/// Structured errors for a single client session.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Request line did not have method, target and version.
    #[error("BAD_REQUEST: {0}")]
    MalformedRequest(String),

    /// Anything other than GET or CONNECT.
    #[error("METHOD_NOT_ALLOWED: {0}")]
    MethodNotAllowed(String),

    /// CONNECT target could not be reached in time.
    #[error("TUNNEL_FAILED: {authority}: {reason}")]
    TunnelDial { authority: String, reason: String },

    /// Origin fetch failed.
    #[error(transparent)]
    Upstream(#[from] Error),

    /// Client socket failure. Nothing is sent back.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status code and reason phrase reported to the client, if any.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            ProxyError::MalformedRequest(_) => Some((400, "Bad Request")),
            ProxyError::MethodNotAllowed(_) => Some((405, "Method Not Allowed")),
            ProxyError::TunnelDial { .. } => Some((504, "Gateway Timeout")),
            ProxyError::Upstream(_) => Some((502, "Bad Gateway")),
            ProxyError::Io(_) => None,
        }
    }

    /// Body sent with the status line. Only upstream failures describe
    /// themselves to the client.
    pub fn body(&self) -> String {
        match self {
            ProxyError::Upstream(e) => e.to_string(),
            _ => String::new(),
        }
    }
}
