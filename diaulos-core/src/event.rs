//! Dispatch events delivered to the application callback

use diaulos_protocol::MessageKind;

/// One inbound event delivered through the dispatch callback
///
/// Every event carries the same fields regardless of kind. A timeout raised
/// for a silent peer arrives as [`MessageKind::Error`] with `payload: None`;
/// frames off the wire always carry `Some` payload, possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Inbound<'a> {
    /// Message kind, or [`MessageKind::Error`] for a synthesized timeout
    pub kind: MessageKind,
    /// Command type or error code; a correlated response carries the
    /// command type its command was issued with
    pub code: u8,
    /// Correlation sequence number (0 = uncorrelated)
    pub seq: u16,
    /// Application payload; None only for synthesized timeouts
    pub payload: Option<&'a [u8]>,
}

impl Inbound<'_> {
    /// Payload length in bytes (0 when absent)
    pub fn payload_len(&self) -> usize {
        self.payload.map_or(0, |payload| payload.len())
    }

    /// Returns true if this event reports a locally raised command timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == MessageKind::Error && self.payload.is_none()
    }
}
