//! Message kinds and well-known command codes.

/// Message kind carried in the KIND byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    /// Request that expects a correlated response
    Command,
    /// Reply to a previously issued command
    Response,
    /// One-way status message, never correlated (SEQ 0)
    Notification,
    /// Failure report from the peer, or a locally raised command timeout
    Error,
}

// Wire format values
const KIND_COMMAND: u8 = 0x01;
const KIND_RESPONSE: u8 = 0x02;
const KIND_NOTIFICATION: u8 = 0x03;
const KIND_ERROR: u8 = 0x04;

/// Command code: open an exchange spanning several messages
pub const CMD_BEGIN_TRANSACTION: u8 = 0x10;
/// Command code: close the exchange opened by [`CMD_BEGIN_TRANSACTION`]
pub const CMD_END_TRANSACTION: u8 = 0x11;

impl MessageKind {
    /// Parse a kind from its wire format byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            KIND_COMMAND => Some(MessageKind::Command),
            KIND_RESPONSE => Some(MessageKind::Response),
            KIND_NOTIFICATION => Some(MessageKind::Notification),
            KIND_ERROR => Some(MessageKind::Error),
            _ => None,
        }
    }

    /// Convert to wire format byte
    pub fn to_byte(self) -> u8 {
        match self {
            MessageKind::Command => KIND_COMMAND,
            MessageKind::Response => KIND_RESPONSE,
            MessageKind::Notification => KIND_NOTIFICATION,
            MessageKind::Error => KIND_ERROR,
        }
    }

    /// Returns true if the peer is expected to answer this message
    pub fn expects_reply(&self) -> bool {
        matches!(self, MessageKind::Command)
    }
}
