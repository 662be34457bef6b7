//! Integration tests for the TCP transport.
//!
//! Each test binds to `127.0.0.1:0` so the OS picks a free port, then
//! drives both ends over a real socket.

use bzauth_transport::{Connection, TcpConnection, TcpTransport, Transport, TransportError};

async fn pair() -> (TcpConnection, TcpConnection) {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
    let addr = transport.local_addr().expect("bound address").to_string();

    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(&addr).await.expect("should connect");
    let server = server.await.expect("task should complete");
    (server, client)
}

#[tokio::test]
async fn test_tcp_accept_and_send_receive() {
    let (server, client) = pair().await;

    assert!(server.id().into_inner() > 0);
    assert_ne!(server.id(), client.id());

    server.send(b"hello from daemon").await.expect("send");
    let mut got = Vec::new();
    while got.len() < b"hello from daemon".len() {
        got.extend(client.recv().await.expect("recv").expect("open"));
    }
    assert_eq!(got, b"hello from daemon");

    client.send(b"hello from peer").await.expect("send");
    let mut got = Vec::new();
    while got.len() < b"hello from peer".len() {
        got.extend(server.recv().await.expect("recv").expect("open"));
    }
    assert_eq!(got, b"hello from peer");
}

#[tokio::test]
async fn test_tcp_recv_after_peer_close_returns_none() {
    let (server, client) = pair().await;

    client.close().await.expect("close");

    assert_eq!(server.recv().await.expect("recv"), None);
}

#[tokio::test]
async fn test_tcp_close_twice_is_ok() {
    let (_server, client) = pair().await;

    client.close().await.expect("first close");
    client.close().await.expect("second close");
}

#[tokio::test]
async fn test_tcp_peer_addr_matches_local_side() {
    let (server, client) = pair().await;

    assert_eq!(client.peer_addr().ip(), server.peer_addr().ip());
}

#[tokio::test]
async fn test_tcp_bind_invalid_address_fails() {
    let result = TcpTransport::bind("not an address").await;

    assert!(matches!(result, Err(TransportError::BindFailed { .. })));
}

#[tokio::test]
async fn test_tcp_recv_caps_chunk_length() {
    let (server, client) = pair().await;

    let big = vec![0x5Au8; bzauth_transport::READ_CHUNK_LEN * 3];
    client.send(&big).await.expect("send");

    let mut total = 0;
    while total < big.len() {
        let chunk = server.recv().await.expect("recv").expect("open");
        assert!(chunk.len() <= bzauth_transport::READ_CHUNK_LEN);
        total += chunk.len();
    }
    assert_eq!(total, big.len());
}
