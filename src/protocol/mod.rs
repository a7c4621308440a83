//! Wire-level protocol: frames, masking, opcodes, and the upgrade handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, LARGE_PAYLOAD, MAX_FRAME_SIZE};
pub use handshake::{
    compute_accept_key, ClientHandshake, HandshakeRequest, HandshakeResponse, WS_GUID,
};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
