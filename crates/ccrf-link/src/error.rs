//! Error types for the link engine and façade.

use ccrf_proto::proxy::RemoteError;
use ccrf_proto::{FrameError, WireError};
use thiserror::Error;

/// All failures surfaced by the library. Codec failures (`Frame`, `Wire`)
/// normally stay inside the reader and are logged rather than returned;
/// they appear here for the paths that decode on behalf of a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied value violates a command-level invariant.
    /// Raised before any byte reaches the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// A frame arrived carrying a response code with no registry entry.
    #[error("unknown response code 0x{0:02X}")]
    UnknownCode(u8),

    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The tty is already claimed by another link engine.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// Enumeration found no device matching the spec.
    #[error("no device matches spec '{0}'")]
    DeviceNotMatched(String),

    /// The link was closed while a caller was waiting.
    #[error("link closed")]
    Closed,

    /// A rendezvous wait exceeded the configured request timeout.
    #[error("request timed out")]
    Timeout,

    /// The reply decoded to a different kind than the command expects.
    #[error("unexpected reply kind (wanted {0})")]
    UnexpectedReply(&'static str),

    /// A server-side failure re-raised on a proxy client.
    #[error("remote error [{kind}]: {message}")]
    Remote {
        kind: String,
        message: String,
        trace: Vec<String>,
    },

    /// The proxy socket closed while requests were outstanding.
    #[error("remote connection closed")]
    RemoteClosed,

    /// Malformed traffic on the proxy socket.
    #[error("proxy protocol: {0}")]
    Protocol(String),

    /// The operation only applies to a directly attached link.
    #[error("operation requires a direct link: {0}")]
    NotDirect(&'static str),
}

impl Error {
    /// Stable kind name used on the proxy wire.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Frame(_) => "frame",
            Error::Wire(_) => "wire",
            Error::UnknownCode(_) => "unknown_code",
            Error::Io(_) => "link_io",
            Error::Serial(_) => "serial",
            Error::DeviceBusy(_) => "device_busy",
            Error::DeviceNotMatched(_) => "device_not_matched",
            Error::Closed => "closed",
            Error::Timeout => "timeout",
            Error::UnexpectedReply(_) => "unexpected_reply",
            Error::Remote { .. } => "remote",
            Error::RemoteClosed => "remote_closed",
            Error::Protocol(_) => "protocol",
            Error::NotDirect(_) => "not_direct",
        }
    }

    /// Serialize for the proxy wire, capturing the source chain as trace
    /// lines.
    pub fn to_remote(&self) -> RemoteError {
        let mut trace = Vec::new();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            trace.push(format!("caused by: {err}"));
            source = err.source();
        }
        RemoteError {
            kind: self.kind_name().to_owned(),
            message: self.to_string(),
            trace,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::Remote {
            kind: err.kind,
            message: err.message,
            trace: err.trace,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_round_trip_preserves_kind() {
        let err = Error::InvalidArgument("port uses restricted bits".to_owned());
        let remote = err.to_remote();
        assert_eq!(remote.kind, "invalid_argument");
        let back = Error::from(remote);
        match back {
            Error::Remote { kind, message, .. } => {
                assert_eq!(kind, "invalid_argument");
                assert!(message.contains("restricted bits"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
