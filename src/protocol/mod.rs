//! RFC 6455 wire format used by the built-in transport.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::Frame;
pub use handshake::{ClientRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::apply_mask;
pub use opcode::OpCode;
