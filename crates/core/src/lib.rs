pub mod error;
pub mod media;
pub mod session;
pub mod transport;

pub use error::{Result, RtpError};
pub use media::Packetizer;
pub use session::{Session, SessionConfig, StopReason};
pub use transport::TransportMode;
