//! Local transports.
//!
//! `link` wires two endpoints together inside one process over
//! `tokio::io::duplex`. On Unix, `start_server` / `connect` run the same
//! connection driver over Unix domain sockets.

#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;
#[cfg(unix)]
use std::time::Duration;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
#[cfg(unix)]
use tracing::{error, warn};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::protocol::message::PeerId;
use crate::transport::stream::{run_connection, ConnectionLimits};
use crate::transport::{Endpoint, Outbox};

/// Buffer size of each direction of an in-process link
pub const LINK_BUFFER_SIZE: usize = 64 * 1024;

/// Driver tasks of an in-process link
#[derive(Debug)]
pub struct LinkHandles {
    pub client: JoinHandle<Result<()>>,
    pub server: JoinHandle<Result<()>>,
}

/// Connect a client endpoint to a server endpoint in-process.
///
/// The client reaches the server as `PeerId::SERVER` through `client_outbox`;
/// the server reaches the client as `client_id` through `server_outbox`.
/// Must be called from within a tokio runtime.
#[instrument(skip_all, fields(client = %client_id))]
pub fn link<C, S>(
    client: Arc<C>,
    client_outbox: &Outbox,
    server: Arc<S>,
    server_outbox: &Outbox,
    client_id: PeerId,
    limits: ConnectionLimits,
) -> Result<LinkHandles>
where
    C: Endpoint + ?Sized + 'static,
    S: Endpoint + ?Sized + 'static,
{
    let to_server = client_outbox.register_peer(PeerId::SERVER)?;
    let to_client = server_outbox.register_peer(client_id)?;
    let (client_io, server_io) = tokio::io::duplex(LINK_BUFFER_SIZE);

    let outbox = client_outbox.clone();
    let client = tokio::spawn(async move {
        let result = run_connection(client_io, client, PeerId::SERVER, to_server, limits).await;
        outbox.unregister(PeerId::SERVER);
        result
    });

    let outbox = server_outbox.clone();
    let server = tokio::spawn(async move {
        let result = run_connection(server_io, server, client_id, to_client, limits).await;
        outbox.unregister(client_id);
        result
    });

    debug!("In-process link established");
    Ok(LinkHandles { client, server })
}

/// Serve `endpoint` on a Unix domain socket until CTRL+C.
#[cfg(unix)]
#[instrument(skip(path, endpoint, outbox), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server<P, E>(
    path: P,
    endpoint: Arc<E>,
    outbox: Outbox,
    limits: ConnectionLimits,
) -> Result<()>
where
    P: AsRef<Path>,
    E: Endpoint + ?Sized + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(path, endpoint, outbox, limits, shutdown_rx).await
}

/// Serve `endpoint` on a Unix domain socket until `shutdown_rx` fires.
///
/// Each accepted connection gets the next `PeerId` starting at 1 and an
/// outbound queue in `outbox` for as long as it stays open.
#[cfg(unix)]
#[instrument(skip(path, endpoint, outbox, shutdown_rx), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server_with_shutdown<P, E>(
    path: P,
    endpoint: Arc<E>,
    outbox: Outbox,
    limits: ConnectionLimits,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()>
where
    P: AsRef<Path>,
    E: Endpoint + ?Sized + 'static,
{
    if path.as_ref().exists() {
        tokio::fs::remove_file(&path).await.ok();
    }
    let path_string = path.as_ref().to_string_lossy().to_string();

    let listener = UnixListener::bind(&path)?;
    info!(path = %path_string, "Listening on unix socket");

    let mut next_peer = 1u64;
    let active_connections = Arc::new(Mutex::new(0u32));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                tokio::pin!(timeout);

                loop {
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {
                            let connections = *active_connections.lock().await;
                            debug!(connections = %connections, "Waiting for connections to close");
                            if connections == 0 {
                                info!("All connections closed, shutting down");
                                break;
                            }
                        }
                    }
                }

                if Path::new(&path_string).exists() {
                    if let Err(e) = tokio::fs::remove_file(&path_string).await {
                        error!(error = %e, path = %path_string, "Failed to remove socket file");
                    } else {
                        info!(path = %path_string, "Removed socket file");
                    }
                }

                return Ok(());
            }

            accept_result = listener.accept() => {
                let stream = match accept_result {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                let peer = PeerId(next_peer);
                next_peer += 1;
                let outbound = match outbox.register_peer(peer) {
                    Ok(rx) => rx,
                    Err(e) => {
                        error!(%peer, error = %e, "Failed to register outbound queue");
                        continue;
                    }
                };
                info!(%peer, "New connection established");

                {
                    let mut count = active_connections.lock().await;
                    *count += 1;
                }

                let endpoint = Arc::clone(&endpoint);
                let outbox = outbox.clone();
                let active_connections = Arc::clone(&active_connections);
                tokio::spawn(async move {
                    // Errors are logged by the driver and only end this connection.
                    let _ = run_connection(stream, endpoint, peer, outbound, limits).await;
                    outbox.unregister(peer);

                    let mut count = active_connections.lock().await;
                    *count -= 1;
                });
            }
        }
    }
}

/// Connect `endpoint` to a Unix domain socket server.
///
/// The server is reachable as `PeerId::SERVER` through `outbox`. The returned
/// task resolves when the connection closes.
#[cfg(unix)]
#[instrument(skip(path, endpoint, outbox), fields(socket_path = %path.as_ref().display()))]
pub async fn connect<P, E>(
    path: P,
    endpoint: Arc<E>,
    outbox: Outbox,
    limits: ConnectionLimits,
) -> Result<JoinHandle<Result<()>>>
where
    P: AsRef<Path>,
    E: Endpoint + ?Sized + 'static,
{
    let stream = UnixStream::connect(path).await?;
    let outbound = outbox.register_peer(PeerId::SERVER)?;
    Ok(tokio::spawn(async move {
        let result = run_connection(stream, endpoint, PeerId::SERVER, outbound, limits).await;
        outbox.unregister(PeerId::SERVER);
        result
    }))
}
