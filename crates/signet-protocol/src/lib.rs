pub mod envelope;
pub mod error;
pub mod messages;
pub mod transport;
pub mod wire;

pub use envelope::{build_frame, build_signed_frame, parse_frame, parse_signed_frame};
pub use error::TransportError;
pub use messages::Signed;
pub use transport::{Transport, WebSocketTransport};
pub use wire::{EnvelopeType, FrameHeader, HEADER_LEN, MAGIC, VERSION};
