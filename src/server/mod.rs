//! TCP front end exposing a [`Broker`] over a line protocol.
//!
//! Each accepted client gets its own task. The server refuses clients beyond
//! [`ConnectionConfig::max_connections`] and, on shutdown, tells every client
//! it is going away and waits for their tasks to finish.

mod connection;
mod protocol;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use subpub_error::{ErrorExt, ProtocolError};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::Semaphore,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

pub use connection::{ConnectionConfig, ConnectionHandler};
pub use protocol::{Command, Event, Reply};

use crate::pubsub::Broker;

pub struct Server {
    listener: TcpListener,
    broker: Broker<Event>,
    config: ConnectionConfig,
    permits: Arc<Semaphore>,
    connections: TaskTracker,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        broker: Broker<Event>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind listener")?;

        Ok(Self {
            listener,
            broker,
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
            config,
            connections: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops [`Server::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of clients currently connected.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Accepts clients until the shutdown token is cancelled, then waits for
    /// every connection task to finish.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, "Server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => self.admit(socket, addr).await,
                    Err(e) => {
                        // Per-connection accept errors (e.g. the peer reset
                        // before we got to it) leave the listener usable.
                        warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        self.connections.close();
        info!(
            active = self.connections.len(),
            "Server stopped accepting, waiting for connections"
        );
        self.connections.wait().await;
        info!("All connections closed");
        Ok(())
    }

    async fn admit(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
    ) {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!(
                %addr,
                limit = self.config.max_connections,
                "Connection limit reached, rejecting"
            );
            let reply = Reply::Error(ProtocolError::TooManyConnections.client_message());
            if let Err(e) = socket.write_all(reply.encode().as_bytes()).await {
                debug!(%addr, error = %e, "Failed to send rejection");
            }
            if let Err(e) = socket.shutdown().await {
                debug!(%addr, error = %e, "Error during shutdown");
            }
            return;
        };

        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handler = ConnectionHandler::new(
            connection_id,
            socket,
            addr,
            self.broker.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
        );

        info!(connection_id, %addr, "Connection established");
        self.connections.spawn(async move {
            let _permit = permit;
            match handler.run().await {
                Ok(()) => debug!(connection_id, "Connection finished"),
                Err(e) => error!(connection_id, error = %e, "Connection failed"),
            }
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("active_connections", &self.connections.len())
            .field("config", &self.config)
            .finish()
    }
}
