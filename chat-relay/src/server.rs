use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{connection::drive_connection, hub::Hub, protocol::ServerMessage};

/// How long the shutdown notice may take before remaining connections are
/// closed regardless.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
    tasks: TaskTracker,
}

impl Server {
    pub fn new(listener: TcpListener, hub: Arc<Hub>) -> Self {
        Self {
            listener,
            hub,
            tasks: TaskTracker::new(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, then waits for every
    /// connection task to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub,
            tasks,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&hub).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, &tasks);
                }
            }
        }

        tasks.close();
        tasks.wait().await;
        info!("relay stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(hub: &Hub) {
    info!(connections = hub.registry().len(), "relay shutting down");
    let notice = ServerMessage::error("server shutting down");
    match timeout(SHUTDOWN_GRACE, hub.broadcaster().broadcast(&notice, None)).await {
        Ok(Ok(report)) => debug!(delivered = report.delivered, "shutdown announced"),
        Ok(Err(err)) => warn!(error = ?err, "failed to announce shutdown"),
        Err(_) => warn!(grace = ?SHUTDOWN_GRACE, "shutdown notice did not reach every connection in time"),
    }
    hub.shutdown_token().cancel();
    // Drivers stuck writing to a stalled peer never see the token.
    for connection in hub.registry().snapshot() {
        connection.close();
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &Arc<Hub>,
    tasks: &TaskTracker,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, hub, tasks),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, hub: &Arc<Hub>, tasks: &TaskTracker) {
    let hub = Arc::clone(hub);
    tasks.spawn(async move {
        let (reader, writer) = stream.into_split();
        if let Err(err) = drive_connection(&hub, reader, writer, Some(peer)).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}
