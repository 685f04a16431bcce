//! Connection acceptance.
//!
//! - **`acceptor`**: the listening socket state machine and the stream of
//!   accepted connections
//! - **`listener`**: the server loop that hands each connection to
//!   [`ConnectionHandler`](crate::http::connection::ConnectionHandler)

pub mod acceptor;
pub mod listener;

pub use acceptor::{AcceptorOptions, AddressFamily, Connection, ConnectionAcceptor, Incoming};
