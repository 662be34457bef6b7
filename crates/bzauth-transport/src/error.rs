use std::net::SocketAddr;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// An outgoing connection could not be established.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending data failed.
    #[error("send to {peer} failed: {source}")]
    SendFailed {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Receiving data failed.
    #[error("receive from {peer} failed: {source}")]
    ReceiveFailed {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
