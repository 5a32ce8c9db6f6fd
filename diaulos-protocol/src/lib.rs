//! Diaulos Wire Format
//!
//! This crate defines the framed binary format exchanged between the two
//! controllers of a diaulos link. The link runs over half-duplex serial, so
//! a frame is always sent as one contiguous burst and received as one
//! idle-delimited run of bytes.
//!
//! # Frame Overview
//!
//! All messages use the same frame layout (multi-byte fields big-endian):
//! ```text
//! ┌───────┬────────┬─────┬──────┬──────┬─────────┬──────────┬─────┐
//! │ START │ LENGTH │ SEQ │ KIND │ CODE │ PAYLOAD │ CHECKSUM │ END │
//! │ 1B    │ 2B     │ 2B  │ 1B   │ 1B   │ 0-502B  │ 2B       │ 1B  │
//! └───────┴────────┴─────┴──────┴──────┴─────────┴──────────┴─────┘
//! ```
//!
//! LENGTH counts itself plus SEQ, KIND, CODE and the payload (6 + payload
//! bytes). CHECKSUM is CRC-16/CCITT-FALSE over the LENGTH through PAYLOAD
//! bytes. Commands carry a nonzero SEQ and are answered by a response or
//! error frame echoing it; notifications always carry SEQ 0.

#![no_std]
#![deny(unsafe_code)]

pub mod crc;
pub mod frame;
pub mod message;

pub use frame::{
    decode, Frame, FrameError, FRAME_END, FRAME_OVERHEAD, FRAME_START, MAX_FRAME_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use message::{MessageKind, CMD_BEGIN_TRANSACTION, CMD_END_TRANSACTION};
