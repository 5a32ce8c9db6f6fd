//! Transport seam between the protocol engine and the serial hardware
//!
//! Provides the trait a board port implements to carry frames over the
//! half-duplex link.

/// Frame transport for one link endpoint
///
/// Implementations own the receive buffer and the idle-line capture
/// machinery; the engine reaches the wire only through this trait.
pub trait LinkPort {
    /// Error type for transmit operations
    type Error;

    /// Send one encoded frame as a single contiguous burst
    ///
    /// Called from the poll context, and from inside the dispatch callback
    /// when the application answers an inbound command. Blocking policy is
    /// the port's concern.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Hand over the completed capture, if one is ready
    ///
    /// Copies the captured run into `buf` and re-arms reception, so the
    /// receive buffer stays owned by the port until the engine has taken
    /// the bytes. Returns the true captured length; when it exceeds
    /// `buf.len()`, only the first `buf.len()` bytes were copied and the
    /// engine discards the run.
    fn take_capture(&mut self, buf: &mut [u8]) -> Option<usize>;
}
