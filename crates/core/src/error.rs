//! Error types for the PS-over-RTP sender.

use crate::transport::TransportMode;

/// Errors that can occur while configuring or feeding a session.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`UnknownTransport`](Self::UnknownTransport),
///   [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`InvalidConfig`](Self::InvalidConfig).
/// - **Lifecycle**: [`AlreadyServing`](Self::AlreadyServing),
///   [`NotServing`](Self::NotServing),
///   [`DeliveryStopped`](Self::DeliveryStopped).
/// - **Transport**: [`Io`](Self::Io), [`ShortWrite`](Self::ShortWrite).
#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport mode name or code that does not map to any known mode.
    #[error("unknown transport mode: {0}")]
    UnknownTransport(String),

    /// A recognized transport mode that has no implementation.
    #[error("unsupported transport mode: {0}")]
    UnsupportedTransport(TransportMode),

    /// [`Session::service`](crate::Session::service) was called more than once.
    #[error("session already serving")]
    AlreadyServing,

    /// Frames were pushed before [`Session::service`](crate::Session::service) started delivery.
    #[error("session is not serving")]
    NotServing,

    /// The delivery thread has exited; the packet queue has no consumer.
    #[error("delivery stopped")]
    DeliveryStopped,

    /// The socket accepted fewer bytes than the packet length.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// A [`SessionConfig`](crate::SessionConfig) value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Convenience alias for `Result<T, RtpError>`.
pub type Result<T> = std::result::Result<T, RtpError>;
