//! Tests for the connection acceptor

use std::io::ErrorKind;
use std::time::Duration;

use h1frame::error::SocketOp;
use h1frame::server::acceptor::{AcceptorOptions, AddressFamily, ConnectionAcceptor};
use tokio::net::TcpStream;

async fn listening() -> (ConnectionAcceptor, h1frame::server::Incoming, std::net::SocketAddr) {
    let mut acceptor = ConnectionAcceptor::default();
    acceptor.bind("127.0.0.1", 0).await.unwrap();
    let incoming = acceptor.listen_default().unwrap();
    let addr = acceptor.local_addr().unwrap();
    (acceptor, incoming, addr)
}

/// Polls until connecting to `addr` is refused.
async fn wait_until_refused(addr: std::net::SocketAddr) -> bool {
    for _ in 0..100 {
        match TcpStream::connect(addr).await {
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => return true,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    false
}

#[tokio::test]
async fn test_bind_assigns_ephemeral_port() {
    let mut acceptor = ConnectionAcceptor::default();
    assert!(acceptor.local_addr().is_none());

    acceptor.bind("127.0.0.1", 0).await.unwrap();
    let addr = acceptor.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
}

#[tokio::test]
async fn test_accepts_every_pending_connection() {
    let (_acceptor, mut incoming, addr) = listening().await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }

    let mut peers = Vec::new();
    for _ in 0..5 {
        let conn = incoming.next().await.unwrap().unwrap();
        assert_eq!(conn.family(), AddressFamily::Ipv4);
        peers.push(conn.peer_addr());
    }

    let mut expected: Vec<_> = clients.iter().map(|c| c.local_addr().unwrap()).collect();
    peers.sort();
    expected.sort();
    assert_eq!(peers, expected);
}

#[tokio::test]
async fn test_accepted_connection_carries_data() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (_acceptor, mut incoming, addr) = listening().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut conn = incoming.next().await.unwrap().unwrap();

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.stream_mut().read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    conn.close().await.unwrap();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_closes_listening_socket() {
    let (acceptor, incoming, addr) = listening().await;

    incoming.cancel().await;

    assert!(acceptor.is_closed());
    let err = TcpStream::connect(addr).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn test_cancel_leaves_unrequested_connections_unaccepted() {
    use tokio::io::AsyncReadExt;

    let (_acceptor, mut incoming, addr) = listening().await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }

    let first = incoming.next().await.unwrap().unwrap();
    let second = incoming.next().await.unwrap().unwrap();
    let yielded = [first.peer_addr(), second.peer_addr()];

    incoming.cancel().await;

    let mut refused = 0;
    for client in clients.iter_mut() {
        if yielded.contains(&client.local_addr().unwrap()) {
            continue;
        }
        // Still in the kernel backlog when the listener closed: reset, not EOF.
        let mut buf = [0u8; 1];
        let err = client.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        refused += 1;
    }
    assert_eq!(refused, 3);

    drop((first, second));
}

#[tokio::test]
async fn test_dropped_next_call_does_not_lose_connection() {
    let (_acceptor, mut incoming, addr) = listening().await;

    // Nobody is connecting yet, so this gives up waiting.
    let waited = tokio::time::timeout(Duration::from_millis(20), incoming.next()).await;
    assert!(waited.is_err());

    let client = TcpStream::connect(addr).await.unwrap();
    let conn = incoming.next().await.unwrap().unwrap();
    assert_eq!(conn.peer_addr(), client.local_addr().unwrap());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (mut acceptor, mut incoming, addr) = listening().await;

    acceptor.close();
    acceptor.close();
    assert!(acceptor.is_closed());
    assert!(acceptor.local_addr().is_none());

    // The stream ends once the accept task has shut down.
    assert!(incoming.next().await.is_none());
    assert!(wait_until_refused(addr).await);
}

#[tokio::test]
async fn test_close_before_listen() {
    let mut acceptor = ConnectionAcceptor::default();
    acceptor.close();
    assert!(acceptor.is_closed());

    let err = acceptor.bind("127.0.0.1", 0).await.unwrap_err();
    assert_eq!(err.op(), SocketOp::Bind);

    let err = acceptor.listen(16).unwrap_err();
    assert_eq!(err.op(), SocketOp::Listen);
}

#[tokio::test]
async fn test_bound_socket_released_on_close() {
    let mut acceptor = ConnectionAcceptor::new(AcceptorOptions { reuse_address: false });
    acceptor.bind("127.0.0.1", 0).await.unwrap();
    let port = acceptor.local_addr().unwrap().port();
    acceptor.close();

    let mut again = ConnectionAcceptor::new(AcceptorOptions { reuse_address: false });
    again.bind("127.0.0.1", port).await.unwrap();
}

#[tokio::test]
async fn test_listen_requires_bind() {
    let mut acceptor = ConnectionAcceptor::default();
    let err = acceptor.listen_default().unwrap_err();

    assert_eq!(err.op(), SocketOp::Listen);
    assert_eq!(err.io_kind(), ErrorKind::InvalidInput);
    assert!(!acceptor.is_closed());
}

#[tokio::test]
async fn test_bind_conflict_reports_system_error() {
    let (_acceptor, _incoming, addr) = listening().await;

    let mut second = ConnectionAcceptor::new(AcceptorOptions { reuse_address: false });
    let err = second.bind("127.0.0.1", addr.port()).await.unwrap_err();

    assert_eq!(err.op(), SocketOp::Bind);
    assert_eq!(err.io_kind(), ErrorKind::AddrInUse);
    assert!(err.raw_os_error().is_some());
}

#[tokio::test]
async fn test_unresolvable_host() {
    let mut acceptor = ConnectionAcceptor::default();
    let err = acceptor.bind("no-such-host.invalid", 0).await.unwrap_err();

    assert_eq!(err.op(), SocketOp::Resolve);
}

#[tokio::test]
async fn test_dropping_stream_stops_accepting() {
    let (acceptor, incoming, addr) = listening().await;

    drop(incoming);

    assert!(acceptor.is_closed());
    assert!(wait_until_refused(addr).await);
}
