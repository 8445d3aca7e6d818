//! Protocol module - wire format, messages, and stream assembly.
//!
//! This module implements the Diameter framing layer:
//! - 20-byte header encoding/decoding
//! - Stream assembler for accumulating partial reads
//! - Message struct with typed accessors

mod assembler;
mod message;
mod wire_format;

pub use assembler::StreamAssembler;
pub use message::{build_message, Message};
pub use wire_format::{
    decode_length, flags, Header, DIAMETER_VERSION, HEADER_SIZE, MAX_COMMAND_CODE,
    MAX_MESSAGE_LENGTH,
};
