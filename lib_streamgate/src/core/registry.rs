//! # Connection Registry
//!
//! Tracks every live subscriber connection, grouped by channel. The map is
//! read on every broadcast and written only on connect/disconnect, so it sits
//! behind a read-write lock. Broadcasts iterate over a snapshot taken under
//! the read lock, which lets connections come and go while a fan-out is in
//! progress.
//!
//! Each connection is torn down exactly once: `evict` flips an atomic flag
//! before touching the map, so concurrent disconnect attempts (client close,
//! write failure, queue overflow, shutdown) race on the flag and only the
//! winner removes the entry and cancels the session.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::event::Channel;
use crate::error::DeliveryError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub type ConnectionId = u64;

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The client closed the socket.
    ClientClosed,
    /// Writing to the socket failed or timed out.
    WriteFailed,
    /// The outbound queue was full when a frame arrived.
    QueueFull,
    /// The session task dropped its end of the queue.
    ReceiverGone,
    /// The server is shutting down.
    Shutdown,
}

/// # Subscriber Handle
///
/// The broadcaster's view of one connected subscriber: the sending half of
/// its bounded outbound queue plus a liveness token the session task watches.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: ConnectionId,
    channel: Channel,
    sender: mpsc::Sender<Bytes>,
    liveness: CancellationToken,
    torn_down: AtomicBool,
    reason: OnceLock<EvictReason>,
}

impl SubscriberHandle {
    /// Creates a handle with a fresh id and returns the queue receiver the
    /// session task drains.
    pub fn new(channel: Channel, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            channel,
            sender,
            liveness: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            reason: OnceLock::new(),
        });
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_alive(&self) -> bool {
        !self.torn_down.load(Ordering::Acquire)
    }

    /// Token cancelled once the connection has been evicted.
    pub fn liveness(&self) -> CancellationToken {
        self.liveness.clone()
    }

    /// Reason recorded by the eviction that tore this connection down.
    pub fn evict_reason(&self) -> Option<EvictReason> {
        self.reason.get().copied()
    }

    /// Non-blocking enqueue of one frame.
    pub fn try_deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed);
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Capacity),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Returns `true` for exactly one caller.
    fn mark_torn_down(&self, reason: EvictReason) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.reason.set(reason);
        true
    }
}

/// # Connection Registry
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<Channel, HashMap<ConnectionId, Arc<SubscriberHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection under its channel. Returns `false` when the handle
    /// was already torn down, in which case nothing is stored.
    pub fn register(&self, handle: &Arc<SubscriberHandle>) -> bool {
        let mut channels = self.channels.write();
        if !handle.is_alive() {
            return false;
        }
        channels
            .entry(handle.channel())
            .or_default()
            .insert(handle.id(), Arc::clone(handle));
        debug!(connection = handle.id(), channel = %handle.channel(), "subscriber registered");
        true
    }

    /// Removes the entry for `id`. Safe to call any number of times.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut channels = self.channels.write();
        channels
            .values_mut()
            .any(|members| members.remove(&id).is_some())
    }

    /// The connections currently registered on `channel`.
    pub fn snapshot(&self, channel: Channel) -> Vec<Arc<SubscriberHandle>> {
        self.channels
            .read()
            .get(&channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Tears a connection down: unregisters it and cancels its session.
    /// Returns `true` only for the call that actually performed the teardown.
    pub fn evict(&self, handle: &SubscriberHandle, reason: EvictReason) -> bool {
        if !handle.mark_torn_down(reason) {
            return false;
        }
        self.unregister(handle.id());
        handle.liveness.cancel();
        info!(
            connection = handle.id(),
            channel = %handle.channel(),
            reason = ?reason,
            "subscriber disconnected"
        );
        true
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.channels.read().get(&channel).map_or(0, HashMap::len)
    }

    pub fn total(&self) -> usize {
        self.channels.read().values().map(HashMap::len).sum()
    }

    /// Evicts every connection with `EvictReason::Shutdown`.
    pub fn close_all(&self) -> usize {
        let everyone: Vec<Arc<SubscriberHandle>> = self
            .channels
            .read()
            .values()
            .flat_map(|members| members.values().cloned())
            .collect();
        everyone
            .iter()
            .filter(|handle| self.evict(handle, EvictReason::Shutdown))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn register_and_snapshot_are_per_channel() {
        let registry = ConnectionRegistry::new();
        let (raw, _raw_rx) = SubscriberHandle::new(Channel::Raw, 4);
        let (structured, _structured_rx) = SubscriberHandle::new(Channel::Structured, 4);

        assert!(registry.register(&raw));
        assert!(registry.register(&structured));

        let snapshot = registry.snapshot(Channel::Raw);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), raw.id());
        assert_eq!(registry.len(Channel::Structured), 1);
        assert_eq!(registry.total(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = SubscriberHandle::new(Channel::Raw, 4);
        registry.register(&handle);

        assert!(registry.unregister(handle.id()));
        assert!(!registry.unregister(handle.id()));
        assert_eq!(registry.len(Channel::Raw), 0);
    }

    #[test]
    fn evicted_handle_cannot_be_registered() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = SubscriberHandle::new(Channel::Raw, 4);

        assert!(registry.evict(&handle, EvictReason::ClientClosed));
        assert!(!registry.register(&handle));
        assert_eq!(registry.total(), 0);
    }

    #[test]
    fn concurrent_evictions_tear_down_exactly_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, _rx) = SubscriberHandle::new(Channel::Structured, 1);
        registry.register(&handle);

        let winners: usize = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    let reason = if i % 2 == 0 {
                        EvictReason::QueueFull
                    } else {
                        EvictReason::ClientClosed
                    };
                    registry.evict(&handle, reason) as usize
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(registry.len(Channel::Structured), 0);
        assert!(handle.liveness().is_cancelled());
        assert!(handle.evict_reason().is_some());
    }

    #[test]
    fn try_deliver_reports_full_and_closed_queues() {
        let (handle, rx) = SubscriberHandle::new(Channel::Raw, 1);

        assert_eq!(handle.try_deliver(Bytes::from_static(b"a")), Ok(()));
        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"b")),
            Err(DeliveryError::Capacity)
        );

        drop(rx);
        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"c")),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn close_all_evicts_everyone() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = Channel::ALL
            .iter()
            .map(|c| SubscriberHandle::new(*c, 2))
            .collect();
        for (handle, _) in &handles {
            registry.register(handle);
        }

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.total(), 0);
        for (handle, _) in &handles {
            assert_eq!(handle.evict_reason(), Some(EvictReason::Shutdown));
        }
    }
}
