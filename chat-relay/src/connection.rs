use std::net::SocketAddr;

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{DecodedFrame, frame_reader},
    dispatch::reply_for,
    error::HubError,
    hub::Hub,
    protocol::ServerMessage,
    registry::ConnectionHandle,
    session::Session,
};

/// Serves one connection from registration to release.
///
/// The connection is registered before the first read and unregistered when
/// the guard drops, whether the loop ends cleanly, with an error, or by
/// unwinding. A handle closed by a failed write ends the loop too. Only
/// transport failures are returned.
pub async fn drive_connection<R, W>(
    hub: &Hub,
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
) -> Result<(), HubError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let handle = ConnectionHandle::new(hub.registry().next_id(), peer, writer)
        .with_write_timeout(hub.config().write_timeout);
    let registration = hub.registry().register_scoped(handle.clone());
    info!(conn = handle.id(), ?peer, "client connected");

    let result = run_decode_loop(hub, &handle, reader).await;

    drop(registration);
    if let Err(error) = handle.shutdown().await {
        debug!(conn = handle.id(), ?error, "failed to shut down writer cleanly");
    }
    info!(conn = handle.id(), ?peer, "client disconnected");

    result
}

async fn run_decode_loop<R>(hub: &Hub, handle: &ConnectionHandle, reader: R) -> Result<(), HubError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = frame_reader(reader, hub.config().max_frame_bytes);
    let mut session = Session::new();
    let shutdown = hub.shutdown_token();

    loop {
        let next = select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(conn = handle.id(), "shutdown requested");
                break;
            }
            _ = handle.closed() => {
                debug!(conn = handle.id(), "connection closed after a failed write");
                break;
            }
            next = frames.next() => next,
        };

        let decoded = match next {
            Some(Ok(decoded)) => decoded,
            Some(Err(error)) => return Err(HubError::Transport(error)),
            None => {
                debug!(conn = handle.id(), "peer closed the stream");
                break;
            }
        };

        for reply in handle_frame(hub, handle, &mut session, decoded).await {
            hub.broadcaster().send(handle, &reply).await?;
        }
    }

    Ok(())
}

async fn handle_frame(
    hub: &Hub,
    handle: &ConnectionHandle,
    session: &mut Session,
    decoded: DecodedFrame,
) -> Vec<ServerMessage> {
    match decoded {
        Ok(line) => hub.dispatcher().dispatch_line(session, &line).await,
        Err(error) => {
            warn!(conn = handle.id(), %error, "discarding undecodable input");
            vec![reply_for(HubError::from(error))]
        }
    }
}
