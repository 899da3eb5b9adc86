//! The TCP streaming acceptor (§3, §4.1): binds the listening socket and
//! spawns one [`Connection`] per accepted peer.

use std::net::SocketAddr;
use std::sync::Arc;

use gw_stream::connection::{CommandHandler, Connection};
use gw_stream::Registry;

use crate::bridge_handler::BridgeHandler;
use crate::error::Error;

/// Accept loop for the binary TCP streaming protocol, wiring every
/// connection to the shared application [`Registry`] and, when present,
/// registering it with the bridge handler so it can receive asynchronous
/// call-control indications (§4.6).
pub struct StreamingAcceptor {
    listener: tokio::net::TcpListener,
    registry: Arc<Registry>,
    handler: Arc<dyn CommandHandler>,
    bridge: Option<Arc<BridgeHandler>>,
}

impl StreamingAcceptor {
    /// Bind the streaming listener.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Io`] from the underlying bind.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn CommandHandler>, bridge: Option<Arc<BridgeHandler>>) -> Result<Self, Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            handler,
            bridge,
        })
    }

    /// This acceptor's bound local address.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Io`] if the listener handle is invalid.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener errors out, spawning one
    /// task per connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `accept` itself fails; per-connection
    /// errors are logged and don't stop the loop.
    pub async fn run(self) -> Result<(), Error> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let connection = Connection::new(socket, self.registry.clone(), self.handler.clone());
            let id = connection.id();
            let bridge = self.bridge.clone();
            if let Some(bridge) = &bridge {
                bridge.register_connection(id, connection.event_sender());
            }
            tokio::spawn(async move {
                if let Err(err) = connection.run().await {
                    tracing::warn!(connection = id, %peer, %err, "connection ended with an error");
                }
                if let Some(bridge) = bridge {
                    bridge.unregister_connection(id);
                }
            });
        }
    }
}
