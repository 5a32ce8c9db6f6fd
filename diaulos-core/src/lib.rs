//! Board-agnostic protocol engine for one endpoint of a diaulos link
//!
//! This crate contains everything above the wire format and below the
//! application:
//!
//! - Transport seam the board port implements ([`LinkPort`])
//! - Receive-capture handoff out of interrupt context ([`CaptureSignal`])
//! - Registry of commands awaiting a response ([`PendingTable`])
//! - Poll-driven engine, timeout sweeper and dispatcher ([`CommLink`])
//!
//! The engine never blocks and never allocates. All dispatching happens on
//! the context that calls [`CommLink::poll`]; time enters as plain
//! millisecond ticks passed into `poll` and `send_command`.

#![no_std]
#![deny(unsafe_code)]

pub mod capture;
pub mod event;
pub mod link;
pub mod pending;
pub mod port;

pub use diaulos_protocol as protocol;

pub use capture::CaptureSignal;
pub use event::Inbound;
pub use link::{CommLink, LinkConfig, LinkStats, Replier, SendError};
pub use pending::{PendingCommand, PendingTable, PENDING_CAPACITY};
pub use port::LinkPort;
