//! Server module
//!
//! Handles TCP connections and manages the accept loop.
//! This module is responsible for accepting connections and delegating
//! command processing to the dispatcher.

mod connection;

use crate::dispatch::Dispatcher;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use connection::Connection;

/// Bind `addr` and serve connections until the listener fails
pub async fn run(addr: &str, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("VigilDB RESP server listening on {}", addr);
    serve(listener, dispatcher).await
}

/// Serve connections from an already bound listener
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    loop {
        // Accept incoming connections
        let (socket, addr) = listener.accept().await?;
        info!("New RESP connection from {}", addr);

        let dispatcher = dispatcher.clone();

        // Spawn a new task to handle this connection
        tokio::spawn(async move {
            let mut connection = Connection::new(socket);

            if let Err(e) = connection.handle(dispatcher).await {
                error!("Connection error from {}: {}", addr, e);
            }

            info!("Connection closed: {}", addr);
        });
    }
}
