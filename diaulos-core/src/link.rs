//! Poll-driven engine tying port, registry and dispatch together

use diaulos_protocol::{decode, Frame, FrameError, MessageKind, MAX_FRAME_SIZE};

use crate::event::Inbound;
use crate::pending::PendingTable;
use crate::port::LinkPort;

/// Engine configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkConfig {
    /// How long a command may stay unanswered before a timeout is raised
    pub command_timeout_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
        }
    }
}

/// Errors surfaced by the send operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError<E> {
    /// The frame could not be encoded
    Frame(FrameError),
    /// The port rejected the transmit
    Port(E),
}

/// Running totals kept by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Frames accepted by the port for transmit
    pub frames_sent: u32,
    /// Frames that decoded cleanly and were dispatched
    pub frames_received: u32,
    /// Captured runs discarded as undecodable
    pub decode_failures: u32,
    /// Commands that expired without an answer
    pub command_timeouts: u32,
    /// Responses that matched no pending command
    pub unmatched_responses: u32,
    /// Commands sent untracked because the registry was full
    pub untracked_commands: u32,
}

/// Reply half of the link, lent to the dispatch callback
///
/// Lets the application answer an inbound message from inside the callback.
/// Only operations that leave the registry and the sequence counter alone
/// are available here; new commands are issued from the poll context.
pub struct Replier<'a, P: LinkPort> {
    port: &'a mut P,
    tx_frame: &'a mut [u8; MAX_FRAME_SIZE],
    stats: &'a mut LinkStats,
}

impl<P: LinkPort> Replier<'_, P> {
    /// Answer a command, echoing its sequence number
    pub fn send_response(
        &mut self,
        seq: u16,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            self.port,
            self.tx_frame,
            self.stats,
            MessageKind::Response,
            seq,
            code,
            payload,
        )
    }

    /// Send an uncorrelated status message (always sequence 0)
    pub fn send_notification(
        &mut self,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            self.port,
            self.tx_frame,
            self.stats,
            MessageKind::Notification,
            0,
            code,
            payload,
        )
    }

    /// Report a failure; sequence 0 sends a standalone error notification
    pub fn send_error(
        &mut self,
        seq: u16,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            self.port,
            self.tx_frame,
            self.stats,
            MessageKind::Error,
            seq,
            code,
            payload,
        )
    }
}

fn send_frame<P: LinkPort>(
    port: &mut P,
    tx_frame: &mut [u8; MAX_FRAME_SIZE],
    stats: &mut LinkStats,
    kind: MessageKind,
    seq: u16,
    code: u8,
    payload: &[u8],
) -> Result<(), SendError<P::Error>> {
    let frame = Frame {
        kind,
        seq,
        code,
        payload,
    };
    let len = frame.encode(tx_frame).map_err(SendError::Frame)?;
    port.transmit(&tx_frame[..len]).map_err(SendError::Port)?;
    stats.frames_sent = stats.frames_sent.saturating_add(1);
    Ok(())
}

/// One endpoint of a diaulos link
///
/// Owns the port, the frame staging buffers, the pending-command registry
/// and the dispatch callback. The engine never blocks and never allocates;
/// everything runs on the context that calls [`poll`](CommLink::poll).
pub struct CommLink<P, F>
where
    P: LinkPort,
{
    port: P,
    config: LinkConfig,
    callback: F,
    pending: PendingTable,
    seq: u16,
    tx_frame: [u8; MAX_FRAME_SIZE],
    rx_frame: [u8; MAX_FRAME_SIZE],
    stats: LinkStats,
}

impl<P, F> CommLink<P, F>
where
    P: LinkPort,
    F: FnMut(Replier<'_, P>, Inbound<'_>),
{
    /// Create a link endpoint over `port`, dispatching through `callback`
    pub fn new(port: P, config: LinkConfig, callback: F) -> Self {
        Self {
            port,
            config,
            callback,
            pending: PendingTable::new(),
            seq: 0,
            tx_frame: [0; MAX_FRAME_SIZE],
            rx_frame: [0; MAX_FRAME_SIZE],
            stats: LinkStats::default(),
        }
    }

    /// Drive the link: decode at most one ready capture, then sweep timeouts
    ///
    /// Call periodically from the main loop with the current millisecond
    /// tick. All dispatching happens inside this call.
    pub fn poll(&mut self, now_ms: u32) {
        self.process_capture();
        self.sweep_timeouts(now_ms);
    }

    /// Issue a command, returning the sequence number it was sent with
    ///
    /// The command is tracked until a response or error frame echoes its
    /// sequence number, or until it times out. With the registry full the
    /// command still goes out, untracked.
    pub fn send_command(
        &mut self,
        code: u8,
        payload: &[u8],
        now_ms: u32,
    ) -> Result<u16, SendError<P::Error>> {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            // 0 stays reserved for uncorrelated traffic
            self.seq = 1;
        }
        let seq = self.seq;

        send_frame(
            &mut self.port,
            &mut self.tx_frame,
            &mut self.stats,
            MessageKind::Command,
            seq,
            code,
            payload,
        )?;

        if !self.pending.record(seq, code, now_ms) {
            self.stats.untracked_commands = self.stats.untracked_commands.saturating_add(1);
        }
        Ok(seq)
    }

    /// Answer a command, echoing its sequence number
    pub fn send_response(
        &mut self,
        seq: u16,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            &mut self.port,
            &mut self.tx_frame,
            &mut self.stats,
            MessageKind::Response,
            seq,
            code,
            payload,
        )
    }

    /// Send an uncorrelated status message (always sequence 0)
    pub fn send_notification(
        &mut self,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            &mut self.port,
            &mut self.tx_frame,
            &mut self.stats,
            MessageKind::Notification,
            0,
            code,
            payload,
        )
    }

    /// Report a failure; sequence 0 sends a standalone error notification
    pub fn send_error(
        &mut self,
        seq: u16,
        code: u8,
        payload: &[u8],
    ) -> Result<(), SendError<P::Error>> {
        send_frame(
            &mut self.port,
            &mut self.tx_frame,
            &mut self.stats,
            MessageKind::Error,
            seq,
            code,
            payload,
        )
    }

    /// Running totals
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Number of commands awaiting a response
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Access the underlying port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable access to the underlying port
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn process_capture(&mut self) {
        let Some(run_len) = self.port.take_capture(&mut self.rx_frame) else {
            return;
        };
        if run_len > self.rx_frame.len() {
            // Run larger than the staging buffer; cannot be a valid frame
            self.stats.decode_failures = self.stats.decode_failures.saturating_add(1);
            return;
        }

        let Self {
            port,
            callback,
            pending,
            tx_frame,
            rx_frame,
            stats,
            ..
        } = self;

        let msg = match decode(&rx_frame[..run_len]) {
            Ok(msg) => msg,
            Err(_) => {
                stats.decode_failures = stats.decode_failures.saturating_add(1);
                return;
            }
        };
        stats.frames_received = stats.frames_received.saturating_add(1);

        match msg.kind {
            MessageKind::Response => match pending.remove(msg.seq) {
                Some(entry) => {
                    // Deliver the command type the request was issued with,
                    // not whatever the peer echoed
                    (callback)(
                        Replier {
                            port,
                            tx_frame,
                            stats,
                        },
                        Inbound {
                            kind: MessageKind::Response,
                            code: entry.code,
                            seq: msg.seq,
                            payload: Some(msg.payload),
                        },
                    );
                }
                None => {
                    stats.unmatched_responses = stats.unmatched_responses.saturating_add(1);
                    (callback)(
                        Replier {
                            port,
                            tx_frame,
                            stats,
                        },
                        Inbound {
                            kind: MessageKind::Response,
                            code: msg.code,
                            seq: msg.seq,
                            payload: Some(msg.payload),
                        },
                    );
                }
            },
            MessageKind::Command | MessageKind::Notification => {
                (callback)(
                    Replier {
                        port,
                        tx_frame,
                        stats,
                    },
                    Inbound {
                        kind: msg.kind,
                        code: msg.code,
                        seq: msg.seq,
                        payload: Some(msg.payload),
                    },
                );
            }
            MessageKind::Error => {
                (callback)(
                    Replier {
                        port,
                        tx_frame,
                        stats,
                    },
                    Inbound {
                        kind: MessageKind::Error,
                        code: msg.code,
                        seq: msg.seq,
                        payload: Some(msg.payload),
                    },
                );
                // A peer error closes the pending command it names
                if msg.seq != 0 {
                    pending.remove(msg.seq);
                }
            }
        }
    }

    fn sweep_timeouts(&mut self, now_ms: u32) {
        while let Some(entry) = self
            .pending
            .pop_expired(now_ms, self.config.command_timeout_ms)
        {
            self.stats.command_timeouts = self.stats.command_timeouts.saturating_add(1);
            let Self {
                port,
                callback,
                tx_frame,
                stats,
                ..
            } = self;
            (callback)(
                Replier {
                    port,
                    tx_frame,
                    stats,
                },
                Inbound {
                    kind: MessageKind::Error,
                    code: entry.code,
                    seq: entry.seq,
                    payload: None,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use diaulos_protocol::MAX_PAYLOAD_SIZE;
    use heapless::Vec;

    #[derive(Default)]
    struct MockPort {
        sent: Vec<Vec<u8, MAX_FRAME_SIZE>, 24>,
        /// Bytes a capture would deliver, plus the length the port reports
        capture: Option<(Vec<u8, MAX_FRAME_SIZE>, usize)>,
        reject_transmit: bool,
    }

    impl LinkPort for MockPort {
        type Error = ();

        fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
            if self.reject_transmit {
                return Err(());
            }
            let copy = Vec::from_slice(frame).map_err(|_| ())?;
            self.sent.push(copy).map_err(|_| ())
        }

        fn take_capture(&mut self, buf: &mut [u8]) -> Option<usize> {
            let (run, reported) = self.capture.take()?;
            let n = run.len().min(buf.len());
            buf[..n].copy_from_slice(&run[..n]);
            Some(reported)
        }
    }

    /// Owned copy of a dispatched event, for asserting after the fact
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Seen {
        kind: MessageKind,
        code: u8,
        seq: u16,
        payload: Option<Vec<u8, 64>>,
    }

    fn seen(msg: &Inbound<'_>) -> Seen {
        Seen {
            kind: msg.kind,
            code: msg.code,
            seq: msg.seq,
            payload: msg.payload.map(|p| Vec::from_slice(p).unwrap()),
        }
    }

    fn capture_of(frame: &Frame<'_>) -> Option<(Vec<u8, MAX_FRAME_SIZE>, usize)> {
        let encoded = frame.encode_to_vec().unwrap();
        let reported = encoded.len();
        Some((encoded, reported))
    }

    #[test]
    fn test_command_response_correlation() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        let seq = link
            .send_command(0x10, &[0xAA, 0xDD, 0xCC, 0xBB], 100)
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(link.pending_commands(), 1);
        assert_eq!(link.port().sent.len(), 1);

        // Peer answers echoing the sequence number; the wire code differs
        // from the command type on purpose
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Response,
            seq,
            code: 0x99,
            payload: &[0x01],
        });
        link.poll(200);

        assert_eq!(link.pending_commands(), 0);
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageKind::Response);
        assert_eq!(log[0].code, 0x10); // recorded command type, not 0x99
        assert_eq!(log[0].seq, 1);
        assert_eq!(log[0].payload.as_deref(), Some(&[0x01][..]));
        assert_eq!(link.stats().frames_received, 1);
    }

    #[test]
    fn test_response_without_entry_reported_unmatched() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Response,
            seq: 7,
            code: 0x42,
            payload: &[],
        });
        link.poll(0);

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageKind::Response);
        assert_eq!(log[0].code, 0x42); // wire code, nothing recorded
        assert_eq!(log[0].seq, 7);
        assert_eq!(log[0].payload.as_deref(), Some(&[][..]));
        assert_eq!(link.stats().unmatched_responses, 1);
        assert_eq!(link.pending_commands(), 0);
    }

    #[test]
    fn test_command_answered_from_inside_callback() {
        let mut link = CommLink::new(
            MockPort::default(),
            LinkConfig::default(),
            |mut replier, msg| {
                if msg.kind == MessageKind::Command {
                    replier.send_response(msg.seq, msg.code, b"ok").unwrap();
                }
            },
        );

        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Command,
            seq: 5,
            code: 0x10,
            payload: &[0x01],
        });
        link.poll(0);

        assert_eq!(link.port().sent.len(), 1);
        let reply = decode(&link.port().sent[0]).unwrap();
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.seq, 5);
        assert_eq!(reply.code, 0x10);
        assert_eq!(reply.payload, b"ok");
        assert_eq!(link.stats().frames_sent, 1);
        assert_eq!(link.pending_commands(), 0);
    }

    #[test]
    fn test_notification_passes_seq_through() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        // A nonzero sequence number on a notification is delivered as-is
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Notification,
            seq: 9,
            code: 0x20,
            payload: &[0xEE],
        });
        link.poll(0);

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, MessageKind::Notification);
        assert_eq!(log[0].seq, 9);
        assert_eq!(link.pending_commands(), 0);
    }

    #[test]
    fn test_error_with_seq_clears_pending() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        let seq = link.send_command(0x10, &[], 0).unwrap();
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Error,
            seq,
            code: 0xEE,
            payload: &[0x05],
        });
        link.poll(10);

        assert_eq!(link.pending_commands(), 0);
        {
            let log = log.borrow();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].kind, MessageKind::Error);
            assert_eq!(log[0].code, 0xEE); // wire error code
            assert_eq!(log[0].payload.as_deref(), Some(&[0x05][..]));
        }

        // The entry is gone, so no timeout fires later
        link.poll(60_000);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.stats().command_timeouts, 0);
    }

    #[test]
    fn test_error_with_seq_zero_leaves_pending() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        link.send_command(0x10, &[], 0).unwrap();
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Error,
            seq: 0,
            code: 0xEE,
            payload: &[],
        });
        link.poll(10);

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.pending_commands(), 1);
    }

    #[test]
    fn test_timeout_fires_exactly_once() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        let seq = link.send_command(0x11, &[], 1000).unwrap();

        // Age exactly equal to the timeout does not fire
        link.poll(6000);
        assert!(log.borrow().is_empty());
        assert_eq!(link.pending_commands(), 1);

        link.poll(6001);
        {
            let log = log.borrow();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].kind, MessageKind::Error);
            assert_eq!(log[0].code, 0x11);
            assert_eq!(log[0].seq, seq);
            assert!(log[0].payload.is_none());
        }
        assert_eq!(link.pending_commands(), 0);

        // Nothing left to expire
        link.poll(20_000);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.stats().command_timeouts, 1);
    }

    #[test]
    fn test_commands_get_distinct_sequence_numbers() {
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, _| {});

        let mut seqs = Vec::<u16, 8>::new();
        for _ in 0..5 {
            seqs.push(link.send_command(0x10, &[], 0).unwrap()).unwrap();
        }

        assert_eq!(&seqs[..], &[1, 2, 3, 4, 5]);
        assert_eq!(link.pending_commands(), 5);
    }

    #[test]
    fn test_sequence_counter_wraps_skipping_zero() {
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, _| {});

        link.seq = u16::MAX - 1;
        assert_eq!(link.send_command(0x10, &[], 0).unwrap(), u16::MAX);
        assert_eq!(link.send_command(0x10, &[], 0).unwrap(), 1);
    }

    #[test]
    fn test_registry_full_sends_untracked() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        for _ in 0..crate::pending::PENDING_CAPACITY {
            link.send_command(0x10, &[], 0).unwrap();
        }
        assert_eq!(link.pending_commands(), crate::pending::PENDING_CAPACITY);

        // The 21st command is transmitted but not tracked
        let seq = link.send_command(0x10, &[], 0).unwrap();
        assert_eq!(seq, 21);
        assert_eq!(link.pending_commands(), crate::pending::PENDING_CAPACITY);
        assert_eq!(link.port().sent.len(), 21);
        assert_eq!(link.stats().untracked_commands, 1);

        // Its late response matches nothing and is reported unmatched
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Response,
            seq,
            code: 0x10,
            payload: &[],
        });
        link.poll(0);
        assert_eq!(link.stats().unmatched_responses, 1);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.pending_commands(), crate::pending::PENDING_CAPACITY);
    }

    #[test]
    fn test_garbage_runs_never_dispatch() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        // Line noise
        link.port_mut().capture = Some((Vec::from_slice(&[0xFF; 32]).unwrap(), 32));
        link.poll(0);

        // Valid frame with one payload bit flipped
        let mut corrupt = Frame {
            kind: MessageKind::Command,
            seq: 1,
            code: 0x10,
            payload: &[0x55],
        }
        .encode_to_vec()
        .unwrap();
        corrupt[7] ^= 0x01;
        let reported = corrupt.len();
        link.port_mut().capture = Some((corrupt, reported));
        link.poll(0);

        assert!(log.borrow().is_empty());
        assert_eq!(link.stats().decode_failures, 2);
        assert_eq!(link.stats().frames_received, 0);

        // The parser state is per-run; a clean frame still dispatches
        link.port_mut().capture = capture_of(&Frame {
            kind: MessageKind::Notification,
            seq: 0,
            code: 0x30,
            payload: &[],
        });
        link.poll(0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(link.stats().frames_received, 1);
    }

    #[test]
    fn test_transmit_failure_leaves_no_entry() {
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, _| {});

        link.port_mut().reject_transmit = true;
        assert_eq!(link.send_command(0x10, &[], 0), Err(SendError::Port(())));
        assert_eq!(link.pending_commands(), 0);
        assert_eq!(link.stats().frames_sent, 0);

        // The failed attempt burned sequence number 1
        link.port_mut().reject_transmit = false;
        assert_eq!(link.send_command(0x10, &[], 0).unwrap(), 2);
        assert_eq!(link.pending_commands(), 1);
    }

    #[test]
    fn test_overlong_capture_discarded() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        // Port reports a run longer than the staging buffer
        link.port_mut().capture = Some((Vec::new(), MAX_FRAME_SIZE + 88));
        link.poll(0);

        assert!(log.borrow().is_empty());
        assert_eq!(link.stats().decode_failures, 1);
    }

    #[test]
    fn test_poll_without_capture_is_quiet() {
        let log = RefCell::new(Vec::<Seen, 8>::new());
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, msg| {
            log.borrow_mut().push(seen(&msg)).unwrap();
        });

        link.poll(0);
        link.poll(1000);

        assert!(log.borrow().is_empty());
        assert_eq!(link.stats(), LinkStats::default());
    }

    #[test]
    fn test_oversized_payload_rejected_on_send() {
        let mut link = CommLink::new(MockPort::default(), LinkConfig::default(), |_, _| {});

        let payload = [0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            link.send_notification(0x20, &payload),
            Err(SendError::Frame(FrameError::FrameTooLarge))
        );
        assert_eq!(link.stats().frames_sent, 0);
    }
}
