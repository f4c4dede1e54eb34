//! Listener loop, connection registry, and server configuration.
//!
//! One [`Server`] owns the well-known-port socket, every [`Session`], and a
//! reusable 64 KiB receive buffer. Everything runs on the calling thread:
//! the loop alternates a bounded wait on the listener socket, a nonblocking
//! drain of each session socket, and a coarse idle sweep for retransmits and
//! expiry. No state is shared with other threads, so sessions need no
//! locking by construction; only the shutdown flag is atomic.
//!
//! The registry is a plain vector scanned linearly by remote endpoint
//! (address and port). Populations are bounded by `max_connections`
//! (default 100), where a scan beats any map.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::frame::{ErrorKind, Frame, FrameError, Mode};
use crate::options::{negotiate, TransferSize};
use crate::session::Session;
use crate::store::FileStore;

/// The well-known TFTP port (RFC 1350).
pub const TFTP_PORT: u16 = 69;

/// Receive scratch; comfortably above the largest legal frame
/// (4 + 65464 bytes).
const SCRATCH_SIZE: usize = 64 * 1024;

/// Bounded wait on the listener socket per loop iteration. Kept well under
/// the sweep interval so session polls and retransmits stay timely.
const LISTEN_WAIT: Duration = Duration::from_millis(50);

/// Minimum spacing between idle sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_millis(512);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which request kinds the server admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl ServeMode {
    pub fn allows_read(self) -> bool {
        !matches!(self, ServeMode::WriteOnly)
    }

    pub fn allows_write(self) -> bool {
        !matches!(self, ServeMode::ReadOnly)
    }
}

/// Operator-facing knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address and port for the listener socket.
    pub bind: SocketAddr,
    /// Directory served files live under.
    pub root: PathBuf,
    /// Enabled request kinds.
    pub mode: ServeMode,
    /// Most concurrent transfers admitted.
    pub max_connections: usize,
    /// Retransmits granted before a stalled session is dropped.
    pub max_retry: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], TFTP_PORT)),
            root: PathBuf::from("."),
            mode: ServeMode::ReadWrite,
            max_connections: 100,
            max_retry: 5,
        }
    }
}

/// Fatal server failures. Everything else is a per-peer wire error or a
/// session-local retry.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
    #[error("listener socket failure: {0}")]
    Listener(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The single-threaded TFTP server.
pub struct Server {
    socket: UdpSocket,
    local_ip: IpAddr,
    store: FileStore,
    config: ServerConfig,
    sessions: Vec<Session>,
    scratch: Vec<u8>,
    shutdown: Arc<AtomicBool>,
    last_sweep: Instant,
}

impl Server {
    /// Bind the listener socket. Failure here is fatal and reported before
    /// any loop starts.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(config.bind).map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;
        socket.set_read_timeout(Some(LISTEN_WAIT))?;
        let local_ip = socket.local_addr()?.ip();
        let store = FileStore::new(&config.root);
        Ok(Self {
            socket,
            local_ip,
            store,
            config,
            sessions: Vec::new(),
            scratch: vec![0u8; SCRATCH_SIZE],
            shutdown: Arc::new(AtomicBool::new(false)),
            last_sweep: Instant::now(),
        })
    }

    /// Address the listener actually bound (resolves port 0 in tests).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for requesting termination from another thread; the loop
    /// checks it between wait cycles.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Number of registered sessions (registry size).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Serve until the shutdown flag is raised or the listener socket fails.
    ///
    /// On exit every session's stream is closed without a farewell frame;
    /// peers discover the termination through their own timeouts.
    pub fn run(&mut self) -> Result<(), ServerError> {
        log::info!(
            "tftp server on {} serving {:?} ({:?}, max {} transfers)",
            self.socket.local_addr()?,
            self.store.root(),
            self.config.mode,
            self.config.max_connections,
        );
        let result = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break Ok(());
            }
            if let Err(e) = self.poll_listener() {
                log::warn!("listener failed: {e}");
                break Err(e);
            }
            self.poll_sessions();
            self.sweep();
            self.reap();
        };
        if !self.sessions.is_empty() {
            log::info!("closing {} active transfer(s)", self.sessions.len());
            self.sessions.clear();
        }
        result
    }

    // -----------------------------------------------------------------------
    // Listener socket
    // -----------------------------------------------------------------------

    /// One bounded wait on the well-known port.
    fn poll_listener(&mut self) -> Result<(), ServerError> {
        let (len, src) = match self.socket.recv_from(&mut self.scratch) {
            Ok(received) => received,
            Err(e) if is_transient(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        // Runts cause no state change and no reply.
        if len < 4 {
            return Ok(());
        }

        // Registered peers occasionally keep talking to port 69 (request
        // retransmits before they learn our TID); route those to the session.
        if let Some(pos) = self.sessions.iter().position(|s| s.remote() == src) {
            let datagram = &self.scratch[..len];
            self.sessions[pos].handle_datagram(datagram);
            return Ok(());
        }

        match Frame::decode(&self.scratch[..len]) {
            Ok(Frame::Rrq {
                filename,
                mode,
                options,
            }) => self.accept_request(src, false, filename, mode, options),
            Ok(Frame::Wrq {
                filename,
                mode,
                options,
            }) => self.accept_request(src, true, filename, mode, options),
            // An ERROR frame is never answered with an ERROR frame.
            Ok(Frame::Error { code, message }) => {
                log::debug!("ignoring stray ERROR {} from {src}: {message}", code.to_u16());
            }
            // Mid-transfer opcode from an endpoint we do not know.
            Ok(_) | Err(FrameError::UnknownOpcode(_)) => {
                log::debug!("stray frame from unknown endpoint {src}");
                self.send_error(src, Frame::error(ErrorKind::UnknownTid));
            }
            Err(e) => {
                log::debug!("malformed request from {src}: {e}");
                self.send_error(src, Frame::error(ErrorKind::IllegalOperation));
            }
        }
        Ok(())
    }

    /// Admission checks plus session start for a fresh RRQ/WRQ.
    fn accept_request(
        &mut self,
        src: SocketAddr,
        write: bool,
        filename: String,
        mode: Mode,
        offered: Vec<(String, String)>,
    ) {
        if mode == Mode::Mail {
            self.send_error(
                src,
                Frame::Error {
                    code: ErrorKind::IllegalOperation,
                    message: "Mail mode is not supported".to_string(),
                },
            );
            return;
        }
        let allowed = if write {
            self.config.mode.allows_write()
        } else {
            self.config.mode.allows_read()
        };
        if !allowed {
            log::info!(
                "refusing {} of {filename:?} from {src}: disabled by configuration",
                if write { "write" } else { "read" },
            );
            self.send_error(src, Frame::error(ErrorKind::AccessViolation));
            return;
        }
        if self.sessions.len() >= self.config.max_connections {
            log::warn!("refusing {src}: {} sessions active", self.sessions.len());
            self.send_error(
                src,
                Frame::Error {
                    code: ErrorKind::IllegalOperation,
                    message: "Too Many Connections".to_string(),
                },
            );
            return;
        }

        let started = if write {
            self.start_write_session(src, filename, offered)
        } else {
            self.start_read_session(src, filename, offered)
        };
        match started {
            Ok(session) => {
                // A first-window read failure already answered the peer.
                if !session.is_done() {
                    self.sessions.push(session);
                }
            }
            Err(reply) => self.send_error(src, reply),
        }
    }

    fn start_read_session(
        &self,
        src: SocketAddr,
        filename: String,
        offered: Vec<(String, String)>,
    ) -> Result<Session, Frame> {
        let (file, size) = self.store.open_read(&filename).map_err(Frame::error)?;
        let (opts, oack) =
            negotiate(&offered, TransferSize::Known(size)).map_err(|e| Frame::Error {
                code: ErrorKind::OptionNegotiationFailed,
                message: e.to_string(),
            })?;
        log::info!(
            "RRQ {filename:?} from {src}: {size} bytes, block {} window {}",
            opts.block_size,
            opts.window_size,
        );
        Session::start_read(src, self.local_ip, filename, file, opts, oack)
            .map_err(session_socket_error)
    }

    fn start_write_session(
        &self,
        src: SocketAddr,
        filename: String,
        offered: Vec<(String, String)>,
    ) -> Result<Session, Frame> {
        // Stream resolution comes first: an unwritable target outranks bad
        // options in the reply.
        let file = self.store.open_write(&filename).map_err(Frame::error)?;
        let (opts, oack) = match negotiate(&offered, TransferSize::FromClient) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                // The write never starts; discard the file created above so
                // a corrected retry is not refused as already existing.
                drop(file);
                let _ = self.store.remove(&filename);
                return Err(Frame::Error {
                    code: ErrorKind::OptionNegotiationFailed,
                    message: e.to_string(),
                });
            }
        };
        log::info!(
            "WRQ {filename:?} from {src}: block {} window {}",
            opts.block_size,
            opts.window_size,
        );
        Session::start_write(src, self.local_ip, filename.clone(), file, opts, oack).map_err(|e| {
            let _ = self.store.remove(&filename);
            session_socket_error(e)
        })
    }

    /// Best-effort ERROR frame from the listener socket, used only before a
    /// session exists (the peer has not learned an ephemeral TID yet).
    fn send_error(&self, dst: SocketAddr, frame: Frame) {
        let _ = self.socket.send_to(&frame.encode(), dst);
    }

    // -----------------------------------------------------------------------
    // Session sockets, sweep, reaping
    // -----------------------------------------------------------------------

    fn poll_sessions(&mut self) {
        let scratch = &mut self.scratch;
        for session in &mut self.sessions {
            session.poll(scratch);
        }
    }

    /// Retransmit and expiry pass, at most every [`SWEEP_INTERVAL`].
    fn sweep(&mut self) {
        if self.last_sweep.elapsed() < SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = Instant::now();
        let now = self.last_sweep;
        let max_retry = self.config.max_retry;
        self.sessions.retain_mut(|session| {
            if session.tick(now, max_retry) {
                note_teardown(session);
                false
            } else {
                true
            }
        });
    }

    /// Drop sessions that finished (or failed) during this iteration.
    fn reap(&mut self) {
        self.sessions.retain(|session| {
            if session.is_done() {
                note_teardown(session);
                false
            } else {
                true
            }
        });
    }
}

fn note_teardown(session: &Session) {
    if session.abandons_partial_write() {
        log::warn!(
            "leaving partial upload {:?} from {}",
            session.filename(),
            session.remote(),
        );
    }
}

fn session_socket_error(e: io::Error) -> Frame {
    log::warn!("could not open a session socket: {e}");
    Frame::error(ErrorKind::NotDefined)
}

/// Recoverable listener conditions: the bounded-wait timeout itself plus the
/// ICMP-driven resets some platforms surface on UDP sockets.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
