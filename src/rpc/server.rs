//! RPC Server
//!
//! TCP server that runs every inbound request through the pipeline.

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::{read_frame, write_frame, Reply, Request};
use crate::error::{Error, Result};
use crate::pipeline::{CallContext, Pipeline};

/// RPC server for node-to-node and client traffic
pub struct RpcServer {
    /// Bind address
    bind_address: String,
    /// Interceptors + terminal handler
    pipeline: Arc<Pipeline>,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl RpcServer {
    /// Create a new RPC server
    pub fn new(bind_address: String, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            bind_address,
            pipeline,
            shutdown: shutdown_tx,
        }
    }

    /// Bind and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        tracing::info!("RPC server listening on {}", self.bind_address);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    ///
    /// Open connections are closed once [`stop`](Self::stop) is called; a
    /// call already being dispatched still gets its reply.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return Err(Error::ShuttingDown);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let pipeline = Arc::clone(&self.pipeline);
                            let shutdown = shutdown_rx.clone();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), pipeline, shutdown).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("RPC server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Handle a single connection, one request at a time
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    pipeline: Arc<Pipeline>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::debug!("Closing connection from {} on shutdown", peer_addr);
                break;
            }
            frame = read_frame::<_, Request>(&mut reader) => frame,
        };

        match frame {
            Ok(request) => {
                tracing::trace!("Received {} {} from {}", request.method, request.id, peer_addr);

                let ctx = CallContext::from_peer(peer_addr.clone());
                let request_id = request.id;
                let reply = match pipeline.dispatch(&ctx, request).await {
                    Ok(response) => Reply::Success(response),
                    Err(e) => {
                        tracing::debug!("Request {} from {} failed: {}", request_id, peer_addr, e);
                        Reply::Failure {
                            request_id,
                            code: e.code(),
                            message: e.to_string(),
                        }
                    }
                };

                let written = write_frame(&mut writer, &reply).await;
                // The call is over once the reply is out
                ctx.cancel();
                written?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading request from {}: {}", peer_addr, e);
                break;
            }
        }
    }

    Ok(())
}
