//! `tftpd` is a TFTP server implementing RFC 1350 with option negotiation
//! (RFC 2347), negotiated block sizes (RFC 2348), timeout and transfer-size
//! options (RFC 2349), and windowed transfers (RFC 7440).
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────────────────┐
//!   UDP :69 ─────▶│            Server              │
//!                 │  (listener loop + registry)    │
//!                 └───┬────────────────────────┬───┘
//!        new RRQ/WRQ  │                        │ DATA / ACK / ERROR
//!                 ┌───▼──────┐          ┌──────▼──────┐
//!                 │ FileStore│          │   Session   │  (one per peer,
//!                 │ (sandbox)│          │ (ephemeral  │   ephemeral TID)
//!                 └──────────┘          │   socket)   │
//!                                       └──┬───────┬──┘
//!                                          │       │
//!                                ┌─────────▼──┐ ┌──▼──────────┐
//!                                │BlockSender │ │BlockReceiver│
//!                                │ (RRQ side) │ │ (WRQ side)  │
//!                                └────────────┘ └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]    is the wire format (serialise / deserialise all six opcodes)
//! - [`options`]  holds option negotiation and RFC bounds
//! - [`sender`]   is the read-transfer sliding window and ACK tracking
//! - [`receiver`] is the write-transfer in-order block acceptance
//! - [`store`]    resolves sandboxed filenames to file streams
//! - [`session`]  is one transfer's lifecycle, retransmits, TID discipline
//! - [`server`]   is the single-threaded listener loop, registry, idle sweep

pub mod frame;
pub mod options;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod store;

pub use frame::{ErrorKind, Frame, FrameError, Mode, Opcode};
pub use options::TransferOptions;
pub use server::{ServeMode, Server, ServerConfig, ServerError, TFTP_PORT};
pub use store::FileStore;
