use std::net::SocketAddrV4;

use thiserror::Error;

/// Rejected before the server ever tries to bind. Exit code 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port must be >= 1024, got {0}")]
    PortTooLow(u16),
    #[error("clients must be > 0")]
    ZeroClients,
    #[error("threads ({threads}) must be between 1 and clients ({clients})")]
    ThreadsOutOfRange { threads: usize, clients: usize },
}

/// Fatal during `Server::start`. Exit code 2.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create epoll instance: {0}")]
    Reactor(#[source] std::io::Error),
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}
