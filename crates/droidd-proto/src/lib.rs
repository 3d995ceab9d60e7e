//! Wire protocol for the droidd device agent.
//!
//! Three channels share this vocabulary: textual JSON envelopes on the
//! control and event channels, headered binary frames on the binary
//! channel, and a closed error-code table across all of them.

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::{now_ms, Envelope, MessageType, Metadata, ProtocolError};
pub use error::{category_of, is_recoverable, AgentError, ErrorCategory, WireError};
pub use frame::{
    correlation_id_of, BinaryFrame, FrameError, FrameFlags, PayloadKind, FRAME_MAGIC, HEADER_LEN,
};
