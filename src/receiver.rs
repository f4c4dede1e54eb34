//! Write-transfer receive-side state machine.
//!
//! [`BlockReceiver`] implements the receiving half of a write request:
//!
//! - Only the **next in-order** block (`last_ack + 1`, 16-bit wrapping) is
//!   accepted and appended to the stream.
//! - A repeat of the last accepted block is reported as a duplicate so the
//!   caller can resend the matching ACK without re-appending (the peer's
//!   retransmit must be answered idempotently).
//! - Any other block number is silently discarded.
//! - A payload shorter than `block_size` is the final block; the stream is
//!   flushed and the receiver reports completion.
//!
//! This module only manages state and stream writes; all socket I/O is the
//! caller's responsibility.

use std::io::{self, Write};

// ---------------------------------------------------------------------------
// BlockReceiver
// ---------------------------------------------------------------------------

/// Outcome of feeding one DATA block to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// In-order block appended; ACK it. `last` is set for the final block.
    Accepted { last: bool },
    /// Retransmit of the previous block; resend the prior ACK, write nothing.
    Duplicate,
    /// Out-of-order block; drop without reply.
    Ignored,
}

/// Receive-side state for one write transfer.
#[derive(Debug)]
pub struct BlockReceiver<W> {
    stream: W,
    block_size: u16,
    /// Highest block written and acknowledged. Starts at 0: the request
    /// itself is acknowledged as block 0, so the first data block is 1.
    last_ack: u16,
    finished: bool,
}

impl<W: Write> BlockReceiver<W> {
    pub fn new(stream: W, block_size: u16) -> Self {
        Self {
            stream,
            block_size,
            last_ack: 0,
            finished: false,
        }
    }

    /// Block number the next outbound ACK should carry.
    pub fn last_ack(&self) -> u16 {
        self.last_ack
    }

    /// `true` once the short final block has been written and flushed.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Process one inbound DATA block.
    ///
    /// I/O errors from the stream (including the final flush) bubble up so
    /// the caller can report a disk-full condition to the peer.
    pub fn on_data(&mut self, block: u16, payload: &[u8]) -> io::Result<DataOutcome> {
        if block == self.last_ack.wrapping_add(1) && !self.finished {
            self.stream.write_all(payload)?;
            self.last_ack = block;
            if payload.len() < self.block_size as usize {
                self.stream.flush()?;
                self.finished = true;
                return Ok(DataOutcome::Accepted { last: true });
            }
            return Ok(DataOutcome::Accepted { last: false });
        }
        if block == self.last_ack {
            return Ok(DataOutcome::Duplicate);
        }
        Ok(DataOutcome::Ignored)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_acks_block_zero() {
        let r = BlockReceiver::new(Vec::new(), 512);
        assert_eq!(r.last_ack(), 0);
        assert!(!r.finished());
    }

    #[test]
    fn in_order_blocks_are_written() {
        let mut r = BlockReceiver::new(Vec::new(), 4);
        assert_eq!(r.on_data(1, b"abcd").unwrap(), DataOutcome::Accepted { last: false });
        assert_eq!(r.on_data(2, b"ef").unwrap(), DataOutcome::Accepted { last: true });
        assert_eq!(r.last_ack(), 2);
        assert!(r.finished());
        assert_eq!(r.stream, b"abcdef");
    }

    #[test]
    fn empty_final_block_completes() {
        let mut r = BlockReceiver::new(Vec::new(), 4);
        assert_eq!(r.on_data(1, b"wxyz").unwrap(), DataOutcome::Accepted { last: false });
        assert_eq!(r.on_data(2, b"").unwrap(), DataOutcome::Accepted { last: true });
        assert_eq!(r.stream, b"wxyz");
    }

    #[test]
    fn duplicate_block_is_not_reappended() {
        let mut r = BlockReceiver::new(Vec::new(), 4);
        r.on_data(1, b"abcd").unwrap();
        assert_eq!(r.on_data(1, b"abcd").unwrap(), DataOutcome::Duplicate);
        assert_eq!(r.stream, b"abcd");
        assert_eq!(r.last_ack(), 1);
    }

    #[test]
    fn out_of_order_block_is_dropped() {
        let mut r = BlockReceiver::new(Vec::new(), 4);
        assert_eq!(r.on_data(3, b"skip").unwrap(), DataOutcome::Ignored);
        assert_eq!(r.last_ack(), 0);
        assert!(r.stream.is_empty());
    }

    #[test]
    fn blocks_after_finish_are_not_accepted() {
        let mut r = BlockReceiver::new(Vec::new(), 4);
        r.on_data(1, b"xy").unwrap(); // short: transfer over
        assert!(r.finished());
        // A retransmit of the final block still reads as a duplicate...
        assert_eq!(r.on_data(1, b"xy").unwrap(), DataOutcome::Duplicate);
        // ...but nothing new is written.
        assert_eq!(r.on_data(2, b"zz").unwrap(), DataOutcome::Ignored);
        assert_eq!(r.stream, b"xy");
    }

    #[test]
    fn block_numbers_wrap_past_65535() {
        let mut r = BlockReceiver::new(Vec::new(), 8);
        let chunk = [5u8; 8];
        for i in 0..65_536u32 {
            let block = (i as u16).wrapping_add(1); // 1..=65535, then 0
            assert_eq!(
                r.on_data(block, &chunk).unwrap(),
                DataOutcome::Accepted { last: false },
                "block {block} rejected"
            );
        }
        // After block 0 the next in-order number is 1 again.
        assert_eq!(r.on_data(1, b"end").unwrap(), DataOutcome::Accepted { last: true });
        assert_eq!(r.stream.len(), 8 * 65_536 + 3);
    }
}
