//! Frame encoding and decoding for the diaulos link.
//!
//! Frame format (multi-byte fields big-endian):
//! - START (1 byte): 0x02 (ASCII STX)
//! - LENGTH (2 bytes): 6 + payload length
//! - SEQ (2 bytes): correlation sequence number, 0 = uncorrelated
//! - KIND (1 byte): message kind identifier
//! - CODE (1 byte): command type, or error code for error frames
//! - PAYLOAD (0-502 bytes): application data
//! - CHECKSUM (2 bytes): CRC-16/CCITT-FALSE over LENGTH through PAYLOAD
//! - END (1 byte): 0x03 (ASCII ETX)

use heapless::Vec;

use crate::crc::crc16;
use crate::message::MessageKind;

/// Frame start marker (ASCII STX)
pub const FRAME_START: u8 = 0x02;

/// Frame end marker (ASCII ETX)
pub const FRAME_END: u8 = 0x03;

/// Fixed framing overhead: START + LENGTH + SEQ + KIND + CODE + CHECKSUM + END
pub const FRAME_OVERHEAD: usize = 1 + 2 + 2 + 1 + 1 + 2 + 1;

/// Maximum complete frame size, sized to the 512-byte link buffers
pub const MAX_FRAME_SIZE: usize = 512;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

// The LENGTH field counts itself plus SEQ, KIND and CODE, but neither the
// markers nor the checksum.
const LENGTH_FIELD_OVERHEAD: usize = 6;

/// Errors that can occur during frame encoding or decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Payload plus overhead exceeds the output buffer or the frame size cap
    FrameTooLarge,
    /// Run too short to hold a frame, or start/end marker missing
    BadFraming,
    /// LENGTH field disagrees with the captured run length
    LengthMismatch,
    /// CRC16 mismatch
    ChecksumMismatch,
    /// Declared payload length exceeds [`MAX_PAYLOAD_SIZE`]
    PayloadOverflow,
    /// KIND byte maps to no known message kind
    UnknownKind,
}

/// A single link message in decoded form
///
/// The payload borrows from the buffer the frame was decoded from, or from
/// the application data it is about to be encoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame<'a> {
    /// Message kind identifier
    pub kind: MessageKind,
    /// Correlation sequence number (0 = uncorrelated)
    pub seq: u16,
    /// Command type, or error code for error frames
    pub code: u8,
    /// Application payload
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Total encoded size of this frame in bytes
    pub fn wire_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    /// Encode this frame into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        let frame_len = self.wire_len();
        if self.payload.len() > MAX_PAYLOAD_SIZE || buffer.len() < frame_len {
            return Err(FrameError::FrameTooLarge);
        }

        let length = (LENGTH_FIELD_OVERHEAD + self.payload.len()) as u16;
        buffer[0] = FRAME_START;
        buffer[1..3].copy_from_slice(&length.to_be_bytes());
        buffer[3..5].copy_from_slice(&self.seq.to_be_bytes());
        buffer[5] = self.kind.to_byte();
        buffer[6] = self.code;
        buffer[7..7 + self.payload.len()].copy_from_slice(self.payload);

        let checksum = crc16(&buffer[1..1 + length as usize]);
        buffer[7 + self.payload.len()..9 + self.payload.len()]
            .copy_from_slice(&checksum.to_be_bytes());
        buffer[frame_len - 1] = FRAME_END;

        Ok(frame_len)
    }

    /// Encode this frame into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, FrameError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        let mut vec = Vec::new();
        vec.extend_from_slice(&buffer[..len])
            .map_err(|_| FrameError::FrameTooLarge)?;
        Ok(vec)
    }
}

/// Decode one complete captured run as a frame
///
/// Half-duplex capture hands the engine whole idle-delimited runs, so the
/// run must contain exactly one frame; partial frames are never reassembled
/// across runs. On success the payload borrows from `run`.
pub fn decode(run: &[u8]) -> Result<Frame<'_>, FrameError> {
    if run.len() < FRAME_OVERHEAD {
        return Err(FrameError::BadFraming);
    }
    if run[0] != FRAME_START || run[run.len() - 1] != FRAME_END {
        return Err(FrameError::BadFraming);
    }

    let length = u16::from_be_bytes([run[1], run[2]]) as usize;
    if length != run.len() - 4 {
        return Err(FrameError::LengthMismatch);
    }

    // length >= LENGTH_FIELD_OVERHEAD holds: the run has FRAME_OVERHEAD
    // bytes at minimum, so the subtraction cannot wrap
    let payload_len = length - LENGTH_FIELD_OVERHEAD;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadOverflow);
    }

    let received = u16::from_be_bytes([run[run.len() - 3], run[run.len() - 2]]);
    if crc16(&run[1..1 + length]) != received {
        return Err(FrameError::ChecksumMismatch);
    }

    let kind = MessageKind::from_byte(run[5]).ok_or(FrameError::UnknownKind)?;

    Ok(Frame {
        kind,
        seq: u16::from_be_bytes([run[3], run[4]]),
        code: run[6],
        payload: &run[7..7 + payload_len],
    })
}
