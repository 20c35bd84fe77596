//! TCP server for handling RESP connections.
//!
//! Accepts incoming connections and spawns one task per client. All tasks
//! share a single storage instance.

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionError};
use crate::protocols::resp::RespHandler;
use crate::storage::Storage;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Pending connection backlog for the listening socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    storage: Arc<Storage>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &Config, storage: Arc<Storage>) -> io::Result<Self> {
        let addr: SocketAddr = config.listen.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address '{}': {e}", config.listen),
            )
        })?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;

        Ok(Server {
            listener,
            storage,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Begin accepting connections. Runs until the process exits.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(address = %self.local_addr()?, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = Arc::clone(&self.connection_limit).acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, keys = self.storage.len(), "New connection");

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let handler = RespHandler::new(Arc::clone(&self.storage));

                    tokio::spawn(async move {
                        match handle_connection(stream, handler).await {
                            Ok(()) => debug!(%peer, "Connection closed"),
                            Err(ConnectionError::Protocol(e)) => {
                                warn!(%peer, error = %e, "Protocol error, closing connection")
                            }
                            Err(ConnectionError::Io(e)) => {
                                warn!(%peer, error = %e, "I/O error, closing connection")
                            }
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
