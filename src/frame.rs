//! TFTP wire format (RFC 1350 frames plus the RFC 2347 option extension).
//!
//! Every datagram exchanged with a peer is one [`Frame`]. This module is
//! responsible for:
//! - Defining the on-wire binary layout (big-endian opcode and block fields,
//!   NUL-terminated ASCII strings, `name \0 value \0` option lists).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Frame`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.

use thiserror::Error;

/// Largest payload a DATA frame may carry (RFC 2348 blksize ceiling).
pub const MAX_BLOCK_SIZE: u16 = 65_464;

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// TFTP operation codes (RFC 1350 §5, OACK from RFC 2347).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Opcode::Rrq,
            2 => Opcode::Wrq,
            3 => Opcode::Data,
            4 => Opcode::Ack,
            5 => Opcode::Error,
            6 => Opcode::Oack,
            _ => return None,
        })
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Transfer mode named in a request (RFC 1350 §1, compared case-insensitively).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    NetAscii,
    Octet,
    Mail,
}

impl Mode {
    /// Parse a mode string from the wire. Any mix of case is accepted.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "netascii" => Some(Mode::NetAscii),
            "octet" => Some(Mode::Octet),
            "mail" => Some(Mode::Mail),
            _ => None,
        }
    }

    /// Canonical lowercase form used when encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::NetAscii => "netascii",
            Mode::Octet => "octet",
            Mode::Mail => "mail",
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Numeric error codes carried by ERROR frames (RFC 1350 §5 appendix,
/// code 8 from RFC 2347).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTid = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    OptionNegotiationFailed = 8,
}

impl ErrorKind {
    /// Codes outside the assigned range fold into [`ErrorKind::NotDefined`],
    /// the RFC's "see message" bucket.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => ErrorKind::FileNotFound,
            2 => ErrorKind::AccessViolation,
            3 => ErrorKind::DiskFull,
            4 => ErrorKind::IllegalOperation,
            5 => ErrorKind::UnknownTid,
            6 => ErrorKind::FileAlreadyExists,
            7 => ErrorKind::NoSuchUser,
            8 => ErrorKind::OptionNegotiationFailed,
            _ => ErrorKind::NotDefined,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Stock human-readable text for an ERROR frame with this code.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::NotDefined => "Not defined",
            ErrorKind::FileNotFound => "File not found",
            ErrorKind::AccessViolation => "Access violation",
            ErrorKind::DiskFull => "Disk full or allocation exceeded",
            ErrorKind::IllegalOperation => "Illegal TFTP operation",
            ErrorKind::UnknownTid => "Unknown transfer ID",
            ErrorKind::FileAlreadyExists => "File already exists",
            ErrorKind::NoSuchUser => "No such user",
            ErrorKind::OptionNegotiationFailed => "Option negotiation failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded TFTP datagram.
///
/// Request options are kept as raw `(name, value)` string pairs in wire
/// order; interpretation (bounds, defaults, unknown-name handling) lives in
/// [`crate::options`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Read request: the client wants to fetch `filename`.
    Rrq {
        filename: String,
        mode: Mode,
        options: Vec<(String, String)>,
    },
    /// Write request: the client wants to store `filename`.
    Wrq {
        filename: String,
        mode: Mode,
        options: Vec<(String, String)>,
    },
    /// One block of file content. A payload shorter than the negotiated
    /// block size (including zero bytes) marks the end of the transfer.
    Data { block: u16, payload: Vec<u8> },
    /// Acknowledgement of `block` (cumulative under RFC 7440 windowing).
    Ack { block: u16 },
    /// Terminal error notice. Never acknowledged, never retransmitted.
    Error { code: ErrorKind, message: String },
    /// Option acknowledgement: the subset of requested options the server
    /// honours, with their final values (RFC 2347).
    Oack { options: Vec<(String, String)> },
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer shorter than the 4-byte minimum frame.
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    /// The opcode field holds a value outside 1..=6.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    /// Structurally invalid frame body.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

impl Frame {
    /// Shorthand for an ERROR frame carrying the code's stock message.
    pub fn error(code: ErrorKind) -> Frame {
        Frame::Error {
            code,
            message: code.default_message().to_string(),
        }
    }

    /// Parse one datagram.
    pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
        if buf.len() < 4 {
            return Err(FrameError::Truncated(buf.len()));
        }
        let raw_op = u16::from_be_bytes([buf[0], buf[1]]);
        let opcode = Opcode::from_u16(raw_op).ok_or(FrameError::UnknownOpcode(raw_op))?;
        let body = &buf[2..];
        match opcode {
            Opcode::Rrq | Opcode::Wrq => decode_request(opcode, body),
            Opcode::Data => Ok(Frame::Data {
                block: u16::from_be_bytes([body[0], body[1]]),
                payload: body[2..].to_vec(),
            }),
            Opcode::Ack => {
                if body.len() != 2 {
                    return Err(FrameError::Malformed("ACK carries trailing bytes"));
                }
                Ok(Frame::Ack {
                    block: u16::from_be_bytes([body[0], body[1]]),
                })
            }
            Opcode::Error => decode_error(body),
            Opcode::Oack => Ok(Frame::Oack {
                options: decode_option_list(body)?,
            }),
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    ///
    /// The final DATA block of a transfer is encoded even when its payload is
    /// empty: the zero-length block is what tells the peer the transfer is
    /// over when the file length is an exact multiple of the block size.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.body_len_hint());
        match self {
            Frame::Rrq {
                filename,
                mode,
                options,
            } => {
                out.extend_from_slice(&Opcode::Rrq.to_u16().to_be_bytes());
                push_str(&mut out, filename);
                push_str(&mut out, mode.as_str());
                push_option_list(&mut out, options);
            }
            Frame::Wrq {
                filename,
                mode,
                options,
            } => {
                out.extend_from_slice(&Opcode::Wrq.to_u16().to_be_bytes());
                push_str(&mut out, filename);
                push_str(&mut out, mode.as_str());
                push_option_list(&mut out, options);
            }
            Frame::Data { block, payload } => {
                out.extend_from_slice(&Opcode::Data.to_u16().to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
                out.extend_from_slice(payload);
            }
            Frame::Ack { block } => {
                out.extend_from_slice(&Opcode::Ack.to_u16().to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
            }
            Frame::Error { code, message } => {
                out.extend_from_slice(&Opcode::Error.to_u16().to_be_bytes());
                out.extend_from_slice(&code.to_u16().to_be_bytes());
                push_str(&mut out, message);
            }
            Frame::Oack { options } => {
                out.extend_from_slice(&Opcode::Oack.to_u16().to_be_bytes());
                push_option_list(&mut out, options);
            }
        }
        out
    }

    fn body_len_hint(&self) -> usize {
        match self {
            Frame::Data { payload, .. } => 2 + payload.len(),
            Frame::Error { message, .. } => 3 + message.len(),
            _ => 32,
        }
    }
}

// ---------------------------------------------------------------------------
// Body parsers
// ---------------------------------------------------------------------------

/// Consume one NUL-terminated ASCII string; returns it and the remainder
/// after the terminator.
fn take_str(buf: &[u8]) -> Result<(String, &[u8]), FrameError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::Malformed("unterminated string"))?;
    let bytes = &buf[..nul];
    if !bytes.is_ascii() {
        return Err(FrameError::Malformed("string is not ASCII"));
    }
    let s = std::str::from_utf8(bytes)
        .map_err(|_| FrameError::Malformed("string is not ASCII"))?
        .to_string();
    Ok((s, &buf[nul + 1..]))
}

fn decode_request(opcode: Opcode, body: &[u8]) -> Result<Frame, FrameError> {
    let (filename, rest) = take_str(body)?;
    if rest.is_empty() {
        return Err(FrameError::Malformed("request has no mode"));
    }
    let (mode_str, rest) = take_str(rest)?;
    let mode = Mode::from_wire(&mode_str).ok_or(FrameError::Malformed("unknown transfer mode"))?;
    let options = decode_option_list(rest)?;
    Ok(match opcode {
        Opcode::Rrq => Frame::Rrq {
            filename,
            mode,
            options,
        },
        _ => Frame::Wrq {
            filename,
            mode,
            options,
        },
    })
}

/// Parse a `name \0 value \0` sequence until the buffer is exhausted.
fn decode_option_list(mut buf: &[u8]) -> Result<Vec<(String, String)>, FrameError> {
    let mut options = Vec::new();
    while !buf.is_empty() {
        let (name, rest) = take_str(buf)?;
        let (value, rest) =
            take_str(rest).map_err(|_| FrameError::Malformed("option name without value"))?;
        options.push((name, value));
        buf = rest;
    }
    Ok(options)
}

fn decode_error(body: &[u8]) -> Result<Frame, FrameError> {
    let code = ErrorKind::from_u16(u16::from_be_bytes([body[0], body[1]]));
    let text = &body[2..];
    // The trailing NUL is supposed to be there but its absence is tolerated.
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    let message = String::from_utf8_lossy(&text[..end]).into_owned();
    Ok(Frame::Error { code, message })
}

// ---------------------------------------------------------------------------
// Body writers
// ---------------------------------------------------------------------------

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn push_option_list(out: &mut Vec<u8>, options: &[(String, String)]) {
    for (name, value) in options {
        push_str(out, name);
        push_str(out, value);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
