//! Registry of commands awaiting a response

use heapless::Vec;

/// Maximum number of commands awaiting a response at once
pub const PENDING_CAPACITY: usize = 20;

/// A command sent to the peer and not yet answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingCommand {
    /// Sequence number the command was sent with
    pub seq: u16,
    /// Command type, echoed to the application on response or timeout
    pub code: u8,
    /// Millisecond tick at which the command was sent
    pub issued_at_ms: u32,
}

/// Fixed-capacity table of in-flight commands
///
/// Entries keep insertion order and lookups are linear scans. Removal
/// shifts the survivors down, preserving their order. When the table is
/// full, new commands go out untracked (fire and forget).
#[derive(Debug)]
pub struct PendingTable {
    entries: Vec<PendingCommand, PENDING_CAPACITY>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Track a command; returns false when the table is full
    pub fn record(&mut self, seq: u16, code: u8, now_ms: u32) -> bool {
        self.entries
            .push(PendingCommand {
                seq,
                code,
                issued_at_ms: now_ms,
            })
            .is_ok()
    }

    /// Look up the entry for `seq`
    pub fn find(&self, seq: u16) -> Option<&PendingCommand> {
        self.entries.iter().find(|entry| entry.seq == seq)
    }

    /// Remove and return the entry for `seq`
    pub fn remove(&mut self, seq: u16) -> Option<PendingCommand> {
        let index = self.entries.iter().position(|entry| entry.seq == seq)?;
        Some(self.entries.remove(index))
    }

    /// Remove and return the first entry strictly older than `timeout_ms`
    ///
    /// Age is computed with wrapping arithmetic so a tick counter rollover
    /// cannot strand entries. Call repeatedly until None to sweep the
    /// whole table.
    pub fn pop_expired(&mut self, now_ms: u32, timeout_ms: u32) -> Option<PendingCommand> {
        let index = self
            .entries
            .iter()
            .position(|entry| now_ms.wrapping_sub(entry.issued_at_ms) > timeout_ms)?;
        Some(self.entries.remove(index))
    }

    /// Number of commands currently awaiting a response
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no commands are in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if no further command can be tracked
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }
}
