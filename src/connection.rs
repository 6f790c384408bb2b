//! Connection lifecycle for both ends of the pose link.
//!
//! The client side retries forever on a fixed delay: the link is a trusted
//! local one and the consumer has nothing better to do than wait for the
//! device host. The server side treats output as fire-and-forget telemetry;
//! records produced while nobody is connected are dropped.

use crate::shutdown::Shutdown;
use crate::types::ConnectionState;
use crate::{Result, StreamError};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_addr(address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = address
        .trim()
        .parse()
        .map_err(|e| StreamError::TransportSetup(format!("invalid address '{}': {}", address, e)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Result of one [`ClientConnection::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The peer closed the connection in an orderly way.
    Closed,
}

/// Client-side timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    /// Fixed delay between reconnect attempts.
    pub retry_delay: Duration,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// Socket read timeout; bounds how long a read can ignore shutdown.
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Consumer-side connection to the device host.
pub struct ClientConnection {
    addr: SocketAddr,
    settings: ClientSettings,
    stream: Mutex<Option<TcpStream>>,
    state: Mutex<ConnectionState>,
    shutdown: Shutdown,
}

impl ClientConnection {
    /// Validate the target address. Does not connect.
    pub fn new(address: &str, port: u16, settings: ClientSettings, shutdown: Shutdown) -> Result<Self> {
        Ok(Self {
            addr: parse_addr(address, port)?,
            settings,
            stream: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            shutdown,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != next {
            log::debug!("Client connection {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// One connection attempt.
    pub fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        let attempt = TcpStream::connect_timeout(&self.addr, self.settings.connect_timeout)
            .and_then(|stream| {
                stream.set_read_timeout(Some(self.settings.read_timeout))?;
                stream.set_nodelay(true)?;
                Ok(stream)
            });
        match attempt {
            Ok(stream) => {
                *lock(&self.stream) = Some(stream);
                self.set_state(ConnectionState::Connected);
                log::info!("Connected to {}", self.addr);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(StreamError::ConnectionLost(format!(
                    "connect to {} failed: {}",
                    self.addr, e
                )))
            }
        }
    }

    /// Drop the current stream and retry every `retry_delay` until connected.
    ///
    /// Returns [`StreamError::Shutdown`] if shutdown fires while waiting.
    pub fn reconnect_loop(&self) -> Result<()> {
        self.disconnect();
        let attempts = self.retry_until(|| self.connect())?;
        log::info!("Reconnected to {} after {} attempt(s)", self.addr, attempts);
        Ok(())
    }

    /// Sleep `retry_delay` before each call to `attempt` until one succeeds.
    /// Returns the number of attempts made.
    fn retry_until<F>(&self, mut attempt: F) -> Result<u64>
    where
        F: FnMut() -> Result<()>,
    {
        let mut attempts: u64 = 0;
        loop {
            if !self.shutdown.sleep(self.settings.retry_delay) {
                return Err(StreamError::Shutdown);
            }
            attempts += 1;
            match attempt() {
                Ok(()) => return Ok(attempts),
                Err(e) => log::debug!("{}: attempt {}: {}", e.kind(), attempts, e),
            }
        }
    }

    /// Connect once, falling back to [`reconnect_loop`](Self::reconnect_loop).
    pub fn connect_or_retry(&self) -> Result<()> {
        match self.connect() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("{}: {}, retrying", e.kind(), e);
                self.reconnect_loop()
            }
        }
    }

    /// Read whatever is available.
    ///
    /// A zero-byte read means the peer closed: the state becomes
    /// `Disconnected` and [`ReadOutcome::Closed`] is returned. Any other I/O
    /// error also disconnects and is returned as [`StreamError::ReadFailure`].
    pub fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let mut guard = lock(&self.stream);
        let stream = guard
            .as_mut()
            .ok_or_else(|| StreamError::ConnectionLost("not connected".into()))?;

        match stream.read(buf) {
            Ok(0) => {
                *guard = None;
                drop(guard);
                self.set_state(ConnectionState::Disconnected);
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => {
                *guard = None;
                drop(guard);
                self.set_state(ConnectionState::Disconnected);
                Err(StreamError::ReadFailure(e))
            }
        }
    }

    pub fn disconnect(&self) {
        if let Some(stream) = lock(&self.stream).take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Write timeout for peers, so a stalled consumer cannot block the sender.
const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Device-side listener that fans records out to accepted peers.
pub struct ServerEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: Mutex<Vec<TcpStream>>,
    state: Mutex<ConnectionState>,
}

impl ServerEndpoint {
    pub fn bind(address: &str, port: u16) -> Result<Self> {
        let addr = parse_addr(address, port)?;
        let listener = TcpListener::bind(addr)
            .map_err(|e| StreamError::TransportSetup(format!("bind {} failed: {}", addr, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| StreamError::TransportSetup(format!("set_nonblocking: {}", e)))?;
        let local_addr = listener.local_addr()?;
        log::info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            peers: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Connecting),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    fn refresh_state(&self, peers: &[TcpStream]) {
        let next = if peers.is_empty() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Connected
        };
        let mut state = lock(&self.state);
        if *state != ConnectionState::Disconnected && *state != next {
            log::debug!("Server endpoint {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Accept every pending connection without blocking. Returns how many were added.
    pub fn accept_pending(&self) -> usize {
        let mut accepted = 0;
        let mut peers = lock(&self.peers);
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let setup = stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_write_timeout(Some(PEER_WRITE_TIMEOUT)))
                        .and_then(|_| stream.set_nodelay(true));
                    match setup {
                        Ok(()) => {
                            log::info!("Client connected: {} ({} total)", addr, peers.len() + 1);
                            peers.push(stream);
                            accepted += 1;
                        }
                        Err(e) => log::warn!("io: failed to configure client {}: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("io: accept failed: {}", e);
                    break;
                }
            }
        }
        self.refresh_state(&peers);
        accepted
    }

    /// Write one record to every peer. Returns the number of peers reached.
    ///
    /// Peers that fail the write are dropped; with no peers the record is
    /// silently discarded.
    pub fn send(&self, record: &[u8]) -> usize {
        let mut peers = lock(&self.peers);
        if peers.is_empty() {
            return 0;
        }
        peers.retain_mut(|peer| match peer.write_all(record) {
            Ok(()) => true,
            Err(e) => {
                let who = peer
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unknown>".into());
                log::warn!("connection_lost: client {} dropped: {}", who, e);
                false
            }
        });
        self.refresh_state(&peers);
        peers.len()
    }

    /// Disconnect all peers and stop reporting as connected.
    pub fn close(&self) {
        let mut peers = lock(&self.peers);
        for peer in peers.drain(..) {
            let _ = peer.shutdown(std::net::Shutdown::Both);
        }
        *lock(&self.state) = ConnectionState::Disconnected;
    }
}
