//! Read-transfer send-side state machine.
//!
//! [`BlockSender`] maintains a sliding window of up to `window_size` DATA
//! blocks in flight (RFC 7440; `window_size` 1 degenerates to the classic
//! RFC 1350 lock-step exchange).
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ACK(b)` means the peer holds every block up
//!   to and including `b`.
//! - An ACK is accepted only when it falls inside the current window, i.e.
//!   within `(last_ack, last_ack + in-flight]` in 16-bit wrapping space;
//!   anything else is ignored without touching the window.
//! - After the window slides, unacknowledged blocks are re-read from the
//!   stream and resent starting at `b + 1` (go back to N).
//! - The block whose payload is shorter than `block_size` (possibly empty)
//!   is the final one; the transfer completes when it is acknowledged.
//!
//! This module only manages state and stream reads; all socket I/O is the
//! caller's responsibility.
//!
//! Block numbers wrap 65535 → 0, so files longer than `65536 × block_size`
//! reuse numbers; the absolute position is tracked separately in
//! `blocks_acked`, which is what stream offsets are computed from.

use std::io::{self, Read, Seek, SeekFrom};

use crate::frame::Frame;

// ---------------------------------------------------------------------------
// BlockSender
// ---------------------------------------------------------------------------

/// Outcome of feeding one ACK to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Duplicate or out-of-window ACK; no state changed.
    Ignored,
    /// The window slid; the caller should send the next window.
    Advanced,
    /// The final block was acknowledged; the transfer is done.
    Complete,
}

/// Send-side window state for one read transfer.
///
/// ```text
///   last_ack              last_ack + in_flight
///      │                          │
///  ────┼──────────────────────────┼────────▶ block space (mod 2^16)
///      │ <──── in flight ────────▶│
/// ```
#[derive(Debug)]
pub struct BlockSender<R> {
    stream: R,
    block_size: u16,
    window_size: u16,
    /// Highest cumulatively acknowledged block (left window edge).
    last_ack: u16,
    /// Absolute count of acknowledged blocks; the stream offset for the
    /// next window is `blocks_acked * block_size`.
    blocks_acked: u64,
    /// Blocks sent beyond `last_ack` and not yet acknowledged.
    in_flight: u16,
    /// Number of the short final block, once the stream has produced it.
    final_block: Option<u16>,
}

impl<R: Read + Seek> BlockSender<R> {
    pub fn new(stream: R, block_size: u16, window_size: u16) -> Self {
        Self {
            stream,
            block_size,
            window_size: window_size.max(1),
            last_ack: 0,
            blocks_acked: 0,
            in_flight: 0,
            final_block: None,
        }
    }

    /// Highest block acknowledged so far.
    pub fn last_ack(&self) -> u16 {
        self.last_ack
    }

    /// `true` once the short final block has been read from the stream.
    pub fn final_block_read(&self) -> bool {
        self.final_block.is_some()
    }

    /// Process a cumulative ACK.
    ///
    /// Accepts `block` only when it lies inside the current window; a
    /// duplicate (`block == last_ack`) or out-of-window number leaves all
    /// state untouched and returns [`AckOutcome::Ignored`].
    pub fn on_ack(&mut self, block: u16) -> AckOutcome {
        let dist = block.wrapping_sub(self.last_ack);
        if dist == 0 || dist > self.in_flight {
            return AckOutcome::Ignored;
        }
        self.last_ack = block;
        self.blocks_acked += dist as u64;
        self.in_flight = 0;
        if self.final_block == Some(block) {
            AckOutcome::Complete
        } else {
            AckOutcome::Advanced
        }
    }

    /// Read and frame the next window of DATA blocks, starting right after
    /// the last acknowledged one.
    ///
    /// Seeks the stream to the acknowledged offset first, so a partially
    /// acknowledged window is re-read rather than buffered; the session
    /// retains only the most recent frame for timeout retransmission.
    ///
    /// Stops early at the short final block. Never returns an empty vector:
    /// at end-of-stream the zero-length terminating block is produced.
    pub fn next_window(&mut self) -> io::Result<Vec<Frame>> {
        self.stream
            .seek(SeekFrom::Start(self.blocks_acked * self.block_size as u64))?;

        let mut frames = Vec::with_capacity(self.window_size as usize);
        for i in 0..self.window_size {
            let block = self.last_ack.wrapping_add(i).wrapping_add(1);
            let payload = read_block(&mut self.stream, self.block_size as usize)?;
            let short = payload.len() < self.block_size as usize;
            frames.push(Frame::Data { block, payload });
            if short {
                self.final_block = Some(block);
                break;
            }
        }
        self.in_flight = frames.len() as u16;
        Ok(frames)
    }
}

/// Read up to `len` bytes, short only at end of stream.
fn read_block<R: Read>(stream: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sender(content: &[u8], block_size: u16, window: u16) -> BlockSender<Cursor<Vec<u8>>> {
        BlockSender::new(Cursor::new(content.to_vec()), block_size, window)
    }

    fn payload_of(frame: &Frame) -> &[u8] {
        match frame {
            Frame::Data { payload, .. } => payload,
            other => panic!("expected DATA, got {other:?}"),
        }
    }

    fn block_of(frame: &Frame) -> u16 {
        match frame {
            Frame::Data { block, .. } => *block,
            other => panic!("expected DATA, got {other:?}"),
        }
    }

    #[test]
    fn short_file_is_one_final_block() {
        let mut s = sender(b"Hello", 512, 1);
        let frames = s.next_window().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(block_of(&frames[0]), 1);
        assert_eq!(payload_of(&frames[0]), b"Hello");
        assert!(s.final_block_read());
        assert_eq!(s.on_ack(1), AckOutcome::Complete);
    }

    #[test]
    fn empty_file_still_sends_one_block() {
        let mut s = sender(b"", 512, 1);
        let frames = s.next_window().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(payload_of(&frames[0]), b"");
        assert_eq!(s.on_ack(1), AckOutcome::Complete);
    }

    #[test]
    fn exact_multiple_ends_with_empty_block() {
        // 1024 bytes at block size 512: blocks 1 and 2 full, block 3 empty.
        let content = vec![7u8; 1024];
        let mut s = sender(&content, 512, 1);

        let w1 = s.next_window().unwrap();
        assert_eq!(payload_of(&w1[0]).len(), 512);
        assert_eq!(s.on_ack(1), AckOutcome::Advanced);

        let w2 = s.next_window().unwrap();
        assert_eq!(payload_of(&w2[0]).len(), 512);
        assert_eq!(s.on_ack(2), AckOutcome::Advanced);

        let w3 = s.next_window().unwrap();
        assert_eq!(block_of(&w3[0]), 3);
        assert_eq!(payload_of(&w3[0]), b"");
        assert_eq!(s.on_ack(3), AckOutcome::Complete);
    }

    #[test]
    fn window_fills_up_to_window_size() {
        // 10 full blocks of 4 bytes plus a short tail.
        let content = vec![1u8; 42];
        let mut s = sender(&content, 4, 4);

        let w1 = s.next_window().unwrap();
        assert_eq!(w1.len(), 4);
        assert_eq!(
            w1.iter().map(block_of).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn window_stops_at_final_block() {
        // 10 bytes at block size 4: blocks 1, 2 full, block 3 short (2 bytes).
        let content = vec![9u8; 10];
        let mut s = sender(&content, 4, 8);

        let frames = s.next_window().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(payload_of(&frames[2]).len(), 2);
        assert!(s.final_block_read());
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let content = vec![0u8; 100];
        let mut s = sender(&content, 4, 2);
        s.next_window().unwrap();

        assert_eq!(s.on_ack(2), AckOutcome::Advanced);
        assert_eq!(s.on_ack(2), AckOutcome::Ignored);
        assert_eq!(s.on_ack(0), AckOutcome::Ignored);
    }

    #[test]
    fn ack_beyond_window_is_ignored() {
        let content = vec![0u8; 100];
        let mut s = sender(&content, 4, 2);
        s.next_window().unwrap(); // blocks 1..=2 in flight

        assert_eq!(s.on_ack(3), AckOutcome::Ignored);
        assert_eq!(s.on_ack(1000), AckOutcome::Ignored);
        // The legitimate window edge still works afterwards.
        assert_eq!(s.on_ack(2), AckOutcome::Advanced);
    }

    #[test]
    fn partial_ack_resends_from_next_block() {
        // 6 full blocks of 4 bytes.
        let content: Vec<u8> = (0u8..24).collect();
        let mut s = sender(&content, 4, 4);

        let w1 = s.next_window().unwrap(); // blocks 1..=4
        assert_eq!(w1.len(), 4);

        // Peer only saw blocks 1 and 2.
        assert_eq!(s.on_ack(2), AckOutcome::Advanced);

        // Refill must restart at block 3 with the same bytes as before.
        let w2 = s.next_window().unwrap();
        assert_eq!(block_of(&w2[0]), 3);
        assert_eq!(payload_of(&w2[0]), payload_of(&w1[2]));
    }

    #[test]
    fn block_numbers_wrap_past_65535() {
        // 65536 full blocks at the minimum block size, then a 3-byte tail:
        // numbering runs 1..=65535, wraps to 0, then the short block is 1.
        let content = vec![3u8; 8 * 65_536 + 3];
        let mut s = sender(&content, 8, 1);

        let mut collected: Vec<u8> = Vec::with_capacity(content.len());
        loop {
            let frames = s.next_window().unwrap();
            assert_eq!(frames.len(), 1);
            let block = block_of(&frames[0]);
            collected.extend_from_slice(payload_of(&frames[0]));
            match s.on_ack(block) {
                AckOutcome::Advanced => {}
                AckOutcome::Complete => break,
                AckOutcome::Ignored => panic!("in-window ack ignored at block {block}"),
            }
        }
        assert_eq!(collected, content);
        assert_eq!(s.last_ack(), 1, "final short block lands back on 1 after wrap");
    }
}
