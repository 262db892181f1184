use std::{io, sync::Arc};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    protocol,
    registry::{ConnectionHandle, ConnectionId, ConnectionRegistry},
};

/// Fans encoded messages out to registered connections.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `payload` to every live connection except `exclude`.
    ///
    /// The payload is serialized once. A recipient whose write fails is
    /// presumed dead and unregistered; delivery to the rest continues.
    pub async fn broadcast<T: Serialize>(
        &self,
        payload: &T,
        exclude: Option<ConnectionId>,
    ) -> io::Result<BroadcastReport> {
        let frame = protocol::encode(payload)?;
        let mut report = BroadcastReport::default();

        for connection in self.registry.snapshot() {
            if Some(connection.id()) == exclude {
                continue;
            }
            match connection.write_frame(&frame).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(conn = connection.id(), peer = ?connection.peer(), ?error, "dropping unreachable recipient");
                    self.registry.unregister(connection.id());
                    report.dropped += 1;
                }
            }
        }

        debug!(delivered = report.delivered, dropped = report.dropped, "broadcast complete");
        Ok(report)
    }

    /// Delivers `payload` to a single connection.
    ///
    /// Failure is returned to the caller; the registry is left untouched.
    pub async fn send<T: Serialize>(
        &self,
        connection: &ConnectionHandle,
        payload: &T,
    ) -> io::Result<()> {
        let frame = protocol::encode(payload)?;
        connection.write_frame(&frame).await.inspect_err(|error| {
            debug!(conn = connection.id(), ?error, "failed to deliver message to client");
        })
    }
}
