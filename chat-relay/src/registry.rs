//! The set of live connections shared by every connection task.
//!
//! The map lock is only ever held to insert, remove or clone handles. Writes
//! go through each handle's own writer lock, after the snapshot has been
//! taken, so one stalled peer cannot block registration of others.
//!
//! A handle whose write fails or times out is closed: the stream may hold a
//! partial frame, so every later write fails fast and the owning driver is
//! woken through [`ConnectionHandle::closed`].

use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::Mutex as AsyncMutex,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

pub type ConnectionId = u64;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, cloneable reference to one connection's outbound half.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Arc<AsyncMutex<BoxedWriter>>,
    write_timeout: Option<Duration>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn new<W>(id: ConnectionId, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: Arc::new(AsyncMutex::new(Box::new(writer))),
            write_timeout: None,
            closed: CancellationToken::new(),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writes one already-encoded frame and flushes it.
    ///
    /// Any failure, including a timeout, closes the handle.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let result = select! {
            biased;
            _ = self.closed.cancelled() => Err(closed_error()),
            result = self.write_locked(frame) => result,
        };
        if result.is_err() {
            self.close();
        }
        result
    }

    async fn write_locked(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?,
            None => write.await,
        }
    }

    /// Marks the connection dead and aborts any write in progress.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the handle has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, handle: ConnectionHandle) {
        self.lock().insert(handle.id(), handle);
    }

    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.lock().remove(&id)
    }

    /// Registers `handle` and returns a guard that unregisters it on drop,
    /// including when the owning task unwinds.
    pub fn register_scoped(self: &Arc<Self>, handle: ConnectionHandle) -> Registration {
        let id = handle.id();
        self.register(handle);
        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Point-in-time copy of the live connections.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The map is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "dropping the registration unregisters the connection"]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(registry: &ConnectionRegistry) -> ConnectionHandle {
        ConnectionHandle::new(registry.next_id(), None, tokio::io::sink())
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = ConnectionRegistry::new();
        let first = handle(&registry);
        let first_id = first.id();
        registry.register(first);
        registry.register(handle(&registry));

        let snapshot = registry.snapshot();
        registry.unregister(first_id);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(first_id));
    }

    #[test]
    fn scoped_registration_unregisters_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let registration = registry.register_scoped(handle(&registry));
        let id = registration.id();
        assert!(registry.contains(id));

        drop(registration);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn scoped_registration_survives_task_panic() {
        let registry = Arc::new(ConnectionRegistry::new());
        let task_registry = Arc::clone(&registry);

        let result = tokio::spawn(async move {
            let _registration = task_registry.register_scoped(handle(&task_registry));
            panic!("connection task blew up");
        })
        .await;

        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_registration_keeps_ids_unique() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.register(handle(&registry));
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
        assert_eq!(registry.len(), 32);
    }

    #[tokio::test]
    async fn write_frame_reaches_the_peer() {
        use tokio::io::AsyncReadExt;

        let (writer, mut reader) = tokio::io::duplex(64);
        let handle = ConnectionHandle::new(1, None, writer);
        handle.write_frame(b"{}\n").await.expect("write");

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"{}\n");
    }

    #[tokio::test]
    async fn timed_out_write_closes_the_handle() {
        use tokio::io::AsyncReadExt;

        let (writer, mut reader) = tokio::io::duplex(8);
        let handle = ConnectionHandle::new(1, None, writer)
            .with_write_timeout(Some(Duration::from_millis(50)));
        let frame = b"{\"type\":\"error\",\"message\":\"slow\"}\n";

        let err = handle.write_frame(frame).await.expect_err("peer is not reading");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(handle.is_closed());

        let err = handle.write_frame(b"{}\n").await.expect_err("handle is closed");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        drop(handle);
        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.expect("read");
        assert_eq!(received, &frame[..8]);
    }

    #[tokio::test]
    async fn close_aborts_a_stalled_write() {
        let (writer, _reader) = tokio::io::duplex(8);
        let handle = ConnectionHandle::new(1, None, writer);
        let stalled = handle.clone();
        let write = tokio::spawn(async move { stalled.write_frame(&[b'x'; 64]).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let result = tokio::time::timeout(Duration::from_secs(1), write)
            .await
            .expect("write aborted")
            .expect("join");
        assert!(result.is_err());
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("closed resolves");
    }
}
