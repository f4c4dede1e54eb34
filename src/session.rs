//! Per-transfer session: one ephemeral socket, one stream, one state machine.
//!
//! A [`Session`] is created by the listener when it accepts an RRQ or WRQ
//! and lives until the transfer completes, the peer reports an error, or the
//! retry budget runs out. Its responsibilities are:
//!
//! - Owning the ephemeral UDP socket all replies originate from (RFC 1350
//!   TID discipline; the listener socket never answers for a session).
//! - Driving [`crate::sender::BlockSender`] or
//!   [`crate::receiver::BlockReceiver`] from decoded frames.
//! - Retaining the most recently sent frame and retransmitting it when the
//!   deadline passes without progress.
//! - Answering datagrams from the wrong endpoint with wire error 5 without
//!   disturbing the transfer.
//!
//! The session never blocks: its socket is nonblocking and is polled by the
//! single listener loop, which also delivers frames that registered peers
//! send to the well-known port.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Instant;

use crate::frame::{ErrorKind, Frame};
use crate::options::TransferOptions;
use crate::receiver::{BlockReceiver, DataOutcome};
use crate::sender::{AckOutcome, BlockSender};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum Transfer {
    Read(BlockSender<BufReader<File>>),
    Write(BlockReceiver<BufWriter<File>>),
}

/// One in-flight transfer, keyed by the peer's endpoint.
pub struct Session {
    remote: SocketAddr,
    socket: UdpSocket,
    transfer: Transfer,
    options: TransferOptions,
    filename: String,
    /// Set after an OACK on a read: the first window waits for ACK(0).
    awaiting_window_start: bool,
    /// Encoded copy of the last frame sent, for timeout retransmission.
    last_frame: Vec<u8>,
    deadline: Instant,
    retries: u32,
    done: bool,
}

impl Session {
    /// Start a read transfer (server sends the file).
    ///
    /// Sends the OACK when `oack` is non-empty, otherwise the first DATA
    /// window, before returning. A stream read failure during that first
    /// window marks the session done; the caller should not register it.
    pub fn start_read(
        remote: SocketAddr,
        local_ip: IpAddr,
        filename: String,
        stream: File,
        options: TransferOptions,
        oack: Vec<(String, String)>,
    ) -> io::Result<Session> {
        let sender = BlockSender::new(
            BufReader::new(stream),
            options.block_size,
            options.window_size,
        );
        let mut session = Session::bind(remote, local_ip, Transfer::Read(sender), options, filename)?;
        if oack.is_empty() {
            session.send_next_window();
        } else {
            session.awaiting_window_start = true;
            session.send_retained(&Frame::Oack { options: oack });
        }
        Ok(session)
    }

    /// Start a write transfer (server stores the file).
    ///
    /// Sends the OACK when `oack` is non-empty, otherwise ACK(0), before
    /// returning. Either way the peer answers with DATA(1).
    pub fn start_write(
        remote: SocketAddr,
        local_ip: IpAddr,
        filename: String,
        stream: File,
        options: TransferOptions,
        oack: Vec<(String, String)>,
    ) -> io::Result<Session> {
        let receiver = BlockReceiver::new(BufWriter::new(stream), options.block_size);
        let mut session =
            Session::bind(remote, local_ip, Transfer::Write(receiver), options, filename)?;
        if oack.is_empty() {
            session.send_retained(&Frame::Ack { block: 0 });
        } else {
            session.send_retained(&Frame::Oack { options: oack });
        }
        Ok(session)
    }

    fn bind(
        remote: SocketAddr,
        local_ip: IpAddr,
        transfer: Transfer,
        options: TransferOptions,
        filename: String,
    ) -> io::Result<Session> {
        // OS-assigned port: this is the transfer ID the peer will talk to.
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))?;
        socket.set_nonblocking(true)?;
        let timeout = options.timeout;
        Ok(Session {
            remote,
            socket,
            transfer,
            options,
            filename,
            awaiting_window_start: false,
            last_frame: Vec::new(),
            deadline: Instant::now() + timeout,
            retries: 0,
            done: false,
        })
    }

    /// Endpoint this session is keyed by in the registry.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// `true` when the session should be dropped from the registry.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// `true` if this session is writing and the file is incomplete.
    pub fn abandons_partial_write(&self) -> bool {
        match &self.transfer {
            Transfer::Write(receiver) => !receiver.finished(),
            Transfer::Read(_) => false,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Drain every datagram queued on the session socket.
    pub fn poll(&mut self, scratch: &mut [u8]) {
        while !self.done {
            match self.socket.recv_from(scratch) {
                Ok((len, src)) => {
                    if src != self.remote {
                        // Someone else knocked on our transfer ID. Tell them
                        // off; the real peer is unaffected.
                        log::debug!("[{}] datagram from stranger {src}", self.remote);
                        let _ = self
                            .socket
                            .send_to(&Frame::error(ErrorKind::UnknownTid).encode(), src);
                        continue;
                    }
                    if len < 4 {
                        continue;
                    }
                    self.handle_datagram(&scratch[..len]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A connection-reset here is the OS echoing an ICMP port
                // unreachable from the peer; the timeout path will reap us.
                Err(e) => {
                    log::debug!("[{}] session socket recv error: {e}", self.remote);
                    return;
                }
            }
        }
    }

    /// Decode and dispatch one datagram that arrived from the session's peer
    /// (on either the session socket or the well-known port).
    pub fn handle_datagram(&mut self, datagram: &[u8]) {
        match Frame::decode(datagram) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                log::warn!("[{}] undecodable frame from peer: {e}", self.remote);
                self.fail(ErrorKind::IllegalOperation);
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Ack { block } => self.on_ack(block),
            Frame::Data { block, payload } => self.on_data(block, &payload),
            Frame::Error { code, message } => {
                // Peer-side abort: tear down silently, never answer an ERROR.
                log::info!(
                    "[{}] peer aborted transfer of {:?}: {} ({message})",
                    self.remote,
                    self.filename,
                    code.to_u16(),
                );
                self.done = true;
            }
            // The peer may repeat its initial request before it has seen our
            // transfer ID; answer by repeating whatever we last sent.
            Frame::Rrq { .. } | Frame::Wrq { .. } => self.resend_last(),
            Frame::Oack { .. } => {
                log::warn!("[{}] unexpected OACK from peer", self.remote);
                self.fail(ErrorKind::IllegalOperation);
            }
        }
    }

    fn on_ack(&mut self, block: u16) {
        let Transfer::Read(sender) = &mut self.transfer else {
            log::warn!("[{}] ACK on a write session", self.remote);
            self.fail(ErrorKind::IllegalOperation);
            return;
        };
        if self.awaiting_window_start {
            // ACK(0) answers the OACK and releases the first window.
            if block == 0 {
                self.awaiting_window_start = false;
                self.retries = 0;
                self.send_next_window();
            }
            return;
        }
        match sender.on_ack(block) {
            AckOutcome::Ignored => {}
            AckOutcome::Advanced => {
                self.retries = 0;
                self.send_next_window();
            }
            AckOutcome::Complete => {
                log::info!("[{}] read of {:?} complete", self.remote, self.filename);
                self.done = true;
            }
        }
    }

    fn on_data(&mut self, block: u16, payload: &[u8]) {
        let block_size = self.options.block_size as usize;
        let Transfer::Write(receiver) = &mut self.transfer else {
            log::warn!("[{}] DATA on a read session", self.remote);
            self.fail(ErrorKind::IllegalOperation);
            return;
        };
        if payload.len() > block_size {
            log::debug!("[{}] oversize DATA block {block} dropped", self.remote);
            return;
        }
        match receiver.on_data(block, payload) {
            Ok(DataOutcome::Accepted { last }) => {
                self.retries = 0;
                self.send_retained(&Frame::Ack { block });
                if last {
                    log::info!("[{}] write of {:?} complete", self.remote, self.filename);
                    self.done = true;
                }
            }
            Ok(DataOutcome::Duplicate) => self.resend_last(),
            Ok(DataOutcome::Ignored) => {}
            Err(e) => {
                log::warn!(
                    "[{}] write to {:?} failed: {e}",
                    self.remote,
                    self.filename
                );
                self.fail(ErrorKind::DiskFull);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Read the next DATA window from the stream and send it, retaining the
    /// last frame for retransmission.
    fn send_next_window(&mut self) {
        let Transfer::Read(sender) = &mut self.transfer else {
            return;
        };
        let frames = match sender.next_window() {
            Ok(frames) => frames,
            Err(e) => {
                log::warn!(
                    "[{}] reading {:?} failed: {e}",
                    self.remote,
                    self.filename
                );
                self.fail(ErrorKind::NotDefined);
                return;
            }
        };
        let last = frames.len() - 1;
        for (i, frame) in frames.iter().enumerate() {
            if i == last {
                self.send_retained(frame);
            } else {
                let _ = self.socket.send_to(&frame.encode(), self.remote);
            }
        }
    }

    /// Send a frame, keep its bytes for the timeout path, refresh the
    /// deadline. Sends are best-effort: a lost datagram is indistinguishable
    /// from a lost packet and the retransmit timer covers both.
    fn send_retained(&mut self, frame: &Frame) {
        self.last_frame = frame.encode();
        let _ = self.socket.send_to(&self.last_frame, self.remote);
        self.deadline = Instant::now() + self.options.timeout;
    }

    fn resend_last(&mut self) {
        if !self.last_frame.is_empty() {
            let _ = self.socket.send_to(&self.last_frame, self.remote);
        }
    }

    /// Send a terminal ERROR to the peer and mark the session finished.
    fn fail(&mut self, code: ErrorKind) {
        let _ = self.socket.send_to(&Frame::error(code).encode(), self.remote);
        self.done = true;
    }

    // -----------------------------------------------------------------------
    // Timeouts
    // -----------------------------------------------------------------------

    /// Called from the idle sweep. Returns `true` when the retry budget is
    /// exhausted and the session must be removed silently, with no final frame.
    pub fn tick(&mut self, now: Instant, max_retry: u32) -> bool {
        if now < self.deadline || self.done {
            return false;
        }
        if self.retries >= max_retry {
            log::warn!(
                "[{}] no progress on {:?} after {} retransmits, giving up",
                self.remote,
                self.filename,
                self.retries,
            );
            return true;
        }
        self.retries += 1;
        log::debug!(
            "[{}] timeout, retransmit #{} ({} bytes)",
            self.remote,
            self.retries,
            self.last_frame.len(),
        );
        self.resend_last();
        self.deadline = now + self.options.timeout;
        false
    }
}
