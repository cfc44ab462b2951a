//! Message protocol
//!
//! Caller ↔ coordinator and leader → remote-endpoint message sets, their
//! JSON codec, close codes, and the handshake version check.

pub mod codec;
pub mod messages;
pub mod version;

pub use codec::{
    decode_caller, decode_remote, encode_coordinator, encode_remote, MAX_FRAME_LEN,
};
pub use messages::{CallerMessage, CloseCode, CoordinatorMessage, FaultKind, RemoteMessage};
pub use version::{check_compatibility, is_compatible, parse_version};
