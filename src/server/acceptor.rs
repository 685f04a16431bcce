//! Listening socket and accept loop.
//!
//! ```text
//!   Unbound ──bind──► Bound ──listen──► Listening
//!      │                │                   │
//!      └────────────────┴──── close/drop ───┴──► Cancelled
//! ```
//!
//! `listen` hands the socket to a task that accepts on demand: each call to
//! [`Incoming::next`] asks the task for one connection, which waits for read
//! readiness and accepts once. Readiness stays set until an accept reports
//! `WouldBlock`, so a backlog of pending connections is drained by consecutive
//! `next` calls without further notifications. Connections nobody asked for
//! stay in the kernel backlog and are refused when the acceptor is cancelled.

use std::io;
use std::net::{self, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::io::unix::AsyncFd;
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DEFAULT_BACKLOG;
use crate::error::{SocketOp, SystemError};

#[derive(Debug, Clone, Copy)]
pub struct AcceptorOptions {
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_address: bool,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        Self { reuse_address: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv4() {
            AddressFamily::Ipv4
        } else {
            AddressFamily::Ipv6
        }
    }
}

/// An accepted client socket, in non-blocking mode.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    family: AddressFamily,
}

impl Connection {
    fn from_std(stream: net::TcpStream, peer_addr: SocketAddr, family: AddressFamily) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: TcpStream::from_std(stream)?,
            peer_addr,
            family,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Family of the listening socket this connection came from.
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Shuts down the write half and closes the socket.
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Shared between the acceptor, its stream and the accept task. The flag flips
/// once; whoever flips it wakes the accept task.
#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    /// Returns `true` for the call that actually closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // notify_one keeps a permit if the task is not waiting yet.
        self.notify.notify_one();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
enum AcceptorState {
    Unbound,
    Bound { socket: TcpSocket, local_addr: SocketAddr },
    Listening { local_addr: SocketAddr },
    Cancelled,
}

/// Owns one listening socket and publishes the connections it accepts.
///
/// Dropping the acceptor cancels it, including a stream returned by
/// [`listen`](ConnectionAcceptor::listen).
#[derive(Debug)]
pub struct ConnectionAcceptor {
    options: AcceptorOptions,
    state: AcceptorState,
    signal: Arc<CloseSignal>,
}

impl Default for ConnectionAcceptor {
    fn default() -> Self {
        Self::new(AcceptorOptions::default())
    }
}

impl ConnectionAcceptor {
    pub fn new(options: AcceptorOptions) -> Self {
        Self {
            options,
            state: AcceptorState::Unbound,
            signal: Arc::new(CloseSignal::default()),
        }
    }

    /// Resolves `host` and binds to the first candidate address that accepts
    /// the bind.
    pub async fn bind(&mut self, host: &str, port: u16) -> Result<(), SystemError> {
        if !matches!(self.state, AcceptorState::Unbound) {
            return Err(invalid_state(SocketOp::Bind, "acceptor is not unbound"));
        }

        let candidates = lookup_host((host, port))
            .await
            .map_err(|e| SystemError::new(SocketOp::Resolve, e))?;

        let mut last_err = None;
        for addr in candidates {
            match self.bind_addr(addr) {
                Ok((socket, local_addr)) => {
                    debug!(%local_addr, "Bound");
                    self.state = AcceptorState::Bound { socket, local_addr };
                    return Ok(());
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Bind candidate failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            SystemError::new(
                SocketOp::Resolve,
                io::Error::new(io::ErrorKind::NotFound, format!("{} resolved to no addresses", host)),
            )
        }))
    }

    fn bind_addr(&self, addr: SocketAddr) -> Result<(TcpSocket, SocketAddr), SystemError> {
        let socket = match AddressFamily::of(&addr) {
            AddressFamily::Ipv4 => TcpSocket::new_v4(),
            AddressFamily::Ipv6 => TcpSocket::new_v6(),
        }
        .map_err(|e| SystemError::new(SocketOp::Socket, e))?;

        socket
            .set_reuseaddr(self.options.reuse_address)
            .map_err(|e| SystemError::new(SocketOp::SetOption, e))?;
        socket
            .bind(addr)
            .map_err(|e| SystemError::new(SocketOp::Bind, e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| SystemError::new(SocketOp::Bind, e))?;

        Ok((socket, local_addr))
    }

    /// Starts listening and returns the stream of accepted connections.
    ///
    /// Must be called from within a tokio runtime. Does not wait for any
    /// connection.
    pub fn listen(&mut self, backlog: u32) -> Result<Incoming, SystemError> {
        let (socket, local_addr) = match std::mem::replace(&mut self.state, AcceptorState::Cancelled) {
            AcceptorState::Bound { socket, local_addr } => (socket, local_addr),
            other => {
                self.state = other;
                return Err(invalid_state(SocketOp::Listen, "acceptor is not bound"));
            }
        };

        let listener = match Self::register(socket, backlog) {
            Ok(listener) => listener,
            Err(e) => {
                // The socket is gone with the failed registration.
                self.signal.close();
                return Err(e);
            }
        };

        let (demand, requests) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(
            listener,
            AddressFamily::of(&local_addr),
            requests,
            self.signal.clone(),
        ));

        info!(%local_addr, backlog, "Listening");
        self.state = AcceptorState::Listening { local_addr };

        Ok(Incoming {
            demand,
            signal: self.signal.clone(),
            task: Some(task),
        })
    }

    fn register(socket: TcpSocket, backlog: u32) -> Result<AsyncFd<net::TcpListener>, SystemError> {
        let listener = socket
            .listen(backlog)
            .map_err(|e| SystemError::new(SocketOp::Listen, e))?;
        // Take the descriptor back from tokio's listener so readiness and the
        // accept calls are driven here; `into_std` leaves it non-blocking.
        listener
            .into_std()
            .and_then(AsyncFd::new)
            .map_err(|e| SystemError::new(SocketOp::Register, e))
    }

    /// [`listen`](Self::listen) with the default backlog of 32.
    pub fn listen_default(&mut self) -> Result<Incoming, SystemError> {
        self.listen(DEFAULT_BACKLOG)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            AcceptorState::Bound { local_addr, .. } | AcceptorState::Listening { local_addr } => Some(*local_addr),
            AcceptorState::Unbound | AcceptorState::Cancelled => None,
        }
    }

    /// Stops accepting and closes the listening socket. Safe to call in any
    /// state and any number of times.
    pub fn close(&mut self) {
        if self.signal.close() {
            info!(local_addr = ?self.local_addr(), "Acceptor cancelled");
        }
        // A bound socket that never listened is closed right here; a
        // listening one belongs to the accept task.
        self.state = AcceptorState::Cancelled;
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

impl Drop for ConnectionAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

fn invalid_state(op: SocketOp, msg: &str) -> SystemError {
    SystemError::new(op, io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()))
}

type Accepted = Result<Connection, SystemError>;

/// Accepted connections, in acceptance order.
///
/// A connection is accepted only while [`next`](Incoming::next) is waiting
/// for it. Yields `Some(Err(_))` once if an accept fails, then `None`.
/// Dropping the stream cancels the acceptor.
#[derive(Debug)]
pub struct Incoming {
    demand: mpsc::UnboundedSender<oneshot::Sender<Accepted>>,
    signal: Arc<CloseSignal>,
    task: Option<JoinHandle<()>>,
}

impl Incoming {
    pub async fn next(&mut self) -> Option<Accepted> {
        let (reply, accepted) = oneshot::channel();
        self.demand.send(reply).ok()?;
        accepted.await.ok()
    }

    /// Cancels the acceptor and waits until the listening socket is closed.
    ///
    /// Pending connections that were never yielded are left to the kernel,
    /// which resets them when the socket closes.
    pub async fn cancel(mut self) {
        self.signal.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Accept task failed");
            }
        }
    }
}

impl Drop for Incoming {
    fn drop(&mut self) {
        self.signal.close();
    }
}

#[derive(Debug)]
enum Step {
    Accepted(Connection),
    /// The `next` call that asked for a connection went away.
    Abandoned,
    Cancelled,
    Failed(SystemError),
}

async fn accept_loop(
    listener: AsyncFd<net::TcpListener>,
    family: AddressFamily,
    mut requests: mpsc::UnboundedReceiver<oneshot::Sender<Accepted>>,
    signal: Arc<CloseSignal>,
) {
    // Accepted for a `next` call that was dropped before taking it.
    let mut held: Option<Connection> = None;
    let mut accepted = 0usize;

    while !signal.is_closed() {
        let mut reply = tokio::select! {
            biased;
            _ = signal.notify.notified() => break,
            reply = requests.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
        };

        let step = match held.take() {
            Some(conn) => Step::Accepted(conn),
            None => accept_one(&listener, family, &signal, &mut reply).await,
        };

        match step {
            Step::Accepted(conn) => {
                accepted += 1;
                if let Err(Ok(conn)) = reply.send(Ok(conn)) {
                    held = Some(conn);
                }
            }
            Step::Abandoned => continue,
            Step::Cancelled => break,
            Step::Failed(e) => {
                error!(error = %e, "Accept failed, closing listener");
                let _ = reply.send(Err(e));
                break;
            }
        }
    }

    signal.close();
    drop(listener);
    info!(accepted, "Listening socket closed");
}

/// Waits for readiness and accepts a single connection.
async fn accept_one(
    listener: &AsyncFd<net::TcpListener>,
    family: AddressFamily,
    signal: &CloseSignal,
    reply: &mut oneshot::Sender<Accepted>,
) -> Step {
    loop {
        let mut guard = tokio::select! {
            biased;
            _ = signal.notify.notified() => return Step::Cancelled,
            _ = reply.closed() => return Step::Abandoned,
            ready = listener.readable() => match ready {
                Ok(guard) => guard,
                Err(e) => return Step::Failed(SystemError::new(SocketOp::Register, e)),
            },
        };

        if signal.is_closed() {
            return Step::Cancelled;
        }

        match guard.get_inner().accept() {
            Ok((stream, peer_addr)) => {
                debug!(%peer_addr, "Accepted connection");
                return match Connection::from_std(stream, peer_addr, family) {
                    Ok(conn) => Step::Accepted(conn),
                    Err(e) => Step::Failed(SystemError::new(SocketOp::Accept, e)),
                };
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => guard.clear_ready(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Step::Failed(SystemError::new(SocketOp::Accept, e)),
        }
    }
}
