//! Option negotiation (RFC 2347 framework; blksize RFC 2348, timeout and
//! tsize RFC 2349, windowsize RFC 7440).
//!
//! # Negotiation contract
//!
//! - Unknown option names are silently ignored.
//! - A known option whose value is not a decimal ASCII integer, or falls
//!   outside its RFC range, fails the whole request with wire error 8.
//! - `windowsize` is additionally capped at [`MAX_WINDOW_SIZE`]; RFC 7440
//!   lets the server answer with any smaller value.
//! - Accepted options whose final value equals the protocol default are
//!   dropped from the OACK list; they would not change behaviour, and an
//!   empty list means the exchange falls back to plain RFC 1350 (no OACK).

use std::time::Duration;

use thiserror::Error;

use crate::frame::MAX_BLOCK_SIZE;

/// Smallest negotiable block size (RFC 2348).
pub const MIN_BLOCK_SIZE: u16 = 8;
/// Block size used when none is negotiated (RFC 1350).
pub const DEFAULT_BLOCK_SIZE: u16 = 512;
/// Retransmit interval used when none is negotiated.
pub const DEFAULT_TIMEOUT_SECS: u8 = 5;
/// Server-side ceiling for `windowsize`; RFC 7440 suggests 8 as a sane
/// maximum and permits the server to negotiate any offer down to it.
pub const MAX_WINDOW_SIZE: u16 = 8;

// ---------------------------------------------------------------------------
// TransferOptions
// ---------------------------------------------------------------------------

/// The option set a transfer runs with, fixed at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes per DATA block; a shorter block ends the transfer.
    pub block_size: u16,
    /// Retransmit interval, also the per-strike session expiry unit.
    pub timeout: Duration,
    /// Blocks the sender may have in flight beyond the last cumulative ACK.
    pub window_size: u16,
    /// Total transfer length when known (RRQ: file size; WRQ: client claim).
    pub transfer_size: Option<u64>,
}

impl Default for TransferOptions {
    /// Classic RFC 1350 behaviour: 512-byte blocks, lock-step window.
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64),
            window_size: 1,
            transfer_size: None,
        }
    }
}

/// A known option carried a value the server must refuse (wire error 8).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad value for option {name}: {value:?}")]
pub struct OptionError {
    pub name: &'static str,
    pub value: String,
}

/// Which side of the transfer the `tsize` option describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    /// RRQ: the server knows the file length and reports it.
    Known(u64),
    /// WRQ: the client announces its length; the server echoes it.
    FromClient,
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Work through a request's raw option list.
///
/// Returns the options the transfer will run with plus the `(name, value)`
/// pairs to answer in an OACK, in the order the client offered them. An
/// empty OACK list means no OACK should be sent at all.
pub fn negotiate(
    offered: &[(String, String)],
    tsize: TransferSize,
) -> Result<(TransferOptions, Vec<(String, String)>), OptionError> {
    let mut accepted = TransferOptions::default();
    let mut oack: Vec<(String, String)> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for (name, value) in offered {
        let lname = name.to_ascii_lowercase();
        // A repeated known option keeps its first occurrence.
        if seen.contains(&lname) {
            continue;
        }
        seen.push(lname.clone());
        match lname.as_str() {
            "blksize" => {
                let v = parse_decimal(value).ok_or_else(|| bad("blksize", value))?;
                if v < MIN_BLOCK_SIZE as u64 || v > MAX_BLOCK_SIZE as u64 {
                    return Err(bad("blksize", value));
                }
                accepted.block_size = v as u16;
                if accepted.block_size != DEFAULT_BLOCK_SIZE {
                    oack.push(("blksize".to_string(), v.to_string()));
                }
            }
            "timeout" => {
                let v = parse_decimal(value).ok_or_else(|| bad("timeout", value))?;
                if !(1..=255).contains(&v) {
                    return Err(bad("timeout", value));
                }
                accepted.timeout = Duration::from_secs(v);
                if v != DEFAULT_TIMEOUT_SECS as u64 {
                    oack.push(("timeout".to_string(), v.to_string()));
                }
            }
            "windowsize" => {
                let v = parse_decimal(value).ok_or_else(|| bad("windowsize", value))?;
                if !(1..=65_535).contains(&v) {
                    return Err(bad("windowsize", value));
                }
                accepted.window_size = (v as u16).min(MAX_WINDOW_SIZE);
                if accepted.window_size != 1 {
                    oack.push(("windowsize".to_string(), accepted.window_size.to_string()));
                }
            }
            "tsize" => {
                let claimed = parse_decimal(value).ok_or_else(|| bad("tsize", value))?;
                let answer = match tsize {
                    TransferSize::Known(size) => size,
                    TransferSize::FromClient => claimed,
                };
                accepted.transfer_size = Some(answer);
                oack.push(("tsize".to_string(), answer.to_string()));
            }
            // RFC 2347: options the server does not recognise are ignored.
            _ => {}
        }
    }

    Ok((accepted, oack))
}

/// Strict decimal ASCII integer (no sign, no whitespace).
fn parse_decimal(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn bad(name: &'static str, value: &str) -> OptionError {
    OptionError {
        name,
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
