//! The shared half of a neighbor: everything producers on other tasks touch.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::domain::{Heartbeat, NeighborMetrics, NeighborState};

/// Arena key of a connection inside the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct SendQueue {
    frames: VecDeque<Vec<u8>>,
    /// Whether the connection task currently waits for writability.
    write_interest: bool,
}

struct Shared {
    id: ConnectionId,
    host_address: String,
    remote_server_port: Mutex<Option<u16>>,
    state: Mutex<NeighborState>,
    send_queue: Mutex<SendQueue>,
    send_queue_capacity: usize,
    io_waker: Notify,
    metrics: NeighborMetrics,
    protocol_version: AtomicU32,
    last_heartbeat: Mutex<Option<Heartbeat>>,
}

/// Cloneable handle to one peer connection.
///
/// Safe to use from any task. The connection task owning the socket watches
/// the handle's waker and drains its send queue.
#[derive(Clone)]
pub struct NeighborHandle {
    shared: Arc<Shared>,
}

impl NeighborHandle {
    pub fn new(
        id: ConnectionId,
        host_address: impl Into<String>,
        remote_server_port: Option<u16>,
        send_queue_capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                host_address: host_address.into(),
                remote_server_port: Mutex::new(remote_server_port),
                state: Mutex::new(NeighborState::Handshaking),
                send_queue: Mutex::new(SendQueue::default()),
                send_queue_capacity: send_queue_capacity.max(1),
                io_waker: Notify::new(),
                metrics: NeighborMetrics::default(),
                protocol_version: AtomicU32::new(0),
                last_heartbeat: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn host_address(&self) -> &str {
        &self.shared.host_address
    }

    /// Server port of the peer; unknown for inbound connections until the
    /// peer's handshake arrives.
    pub fn remote_server_port(&self) -> Option<u16> {
        *self.shared.remote_server_port.lock()
    }

    pub fn set_remote_server_port(&self, port: u16) {
        *self.shared.remote_server_port.lock() = Some(port);
    }

    /// `host:port` of the peer's server socket.
    pub fn identity(&self) -> String {
        match self.remote_server_port() {
            Some(port) => format!("{}:{}", self.shared.host_address, port),
            None => format!("{}:?", self.shared.host_address),
        }
    }

    pub fn state(&self) -> NeighborState {
        *self.shared.state.lock()
    }

    /// Moves to `target` unless the neighbor is already marked for disconnect.
    ///
    /// No other transition is validated.
    pub fn set_state(&self, target: NeighborState) {
        let mut state = self.shared.state.lock();
        if *state == NeighborState::MarkedForDisconnect {
            return;
        }
        trace!(neighbor = %self.identity(), from = ?*state, to = ?target, "state change");
        *state = target;
        drop(state);

        if target == NeighborState::MarkedForDisconnect {
            // let the connection task notice without waiting for traffic
            self.shared.io_waker.notify_one();
        }
    }

    /// Queues an outbound frame.
    ///
    /// Returns `false` and counts a dropped packet when the queue is full.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        let wake = {
            let mut queue = self.shared.send_queue.lock();
            if queue.frames.len() >= self.shared.send_queue_capacity {
                drop(queue);
                self.shared.metrics.incr_dropped_send_packets();
                debug!(neighbor = %self.identity(), "send queue full, dropping packet");
                return false;
            }
            queue.frames.push_back(frame);
            !std::mem::replace(&mut queue.write_interest, true)
        };
        if wake {
            self.shared.io_waker.notify_one();
        }
        true
    }

    pub fn send_queue_len(&self) -> usize {
        self.shared.send_queue.lock().frames.len()
    }

    /// Copies the queued frames, oldest first.
    pub fn queued_frames(&self) -> Vec<Vec<u8>> {
        self.shared.send_queue.lock().frames.iter().cloned().collect()
    }

    pub fn metrics(&self) -> &NeighborMetrics {
        &self.shared.metrics
    }

    /// Negotiated protocol version, 0 before the handshake.
    pub fn protocol_version(&self) -> u32 {
        self.shared.protocol_version.load(Ordering::Relaxed)
    }

    pub(crate) fn set_protocol_version(&self, version: u32) {
        self.shared.protocol_version.store(version, Ordering::Relaxed);
    }

    /// The most recent heartbeat received from the peer.
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        *self.shared.last_heartbeat.lock()
    }

    pub(crate) fn record_heartbeat(&self, heartbeat: Heartbeat) {
        *self.shared.last_heartbeat.lock() = Some(heartbeat);
    }

    pub(crate) fn io_waker(&self) -> &Notify {
        &self.shared.io_waker
    }

    pub(crate) fn pop_frame(&self) -> Option<Vec<u8>> {
        self.shared.send_queue.lock().frames.pop_front()
    }

    pub(crate) fn write_interest(&self) -> bool {
        self.shared.send_queue.lock().write_interest
    }

    /// Drops write interest if nothing is queued.
    ///
    /// Checked under the queue lock so a concurrent `send` either sees the
    /// interest still set or re-enables it and wakes the task.
    pub(crate) fn disable_write_interest_if_idle(&self) -> bool {
        let mut queue = self.shared.send_queue.lock();
        if queue.frames.is_empty() {
            queue.write_interest = false;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for NeighborHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighborHandle")
            .field("id", &self.shared.id)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(capacity: usize) -> NeighborHandle {
        NeighborHandle::new(ConnectionId(1), "10.0.0.1", Some(15600), capacity)
    }

    #[test]
    fn test_marked_for_disconnect_is_terminal() {
        let neighbor = handle(10);
        neighbor.set_state(NeighborState::MarkedForDisconnect);
        neighbor.set_state(NeighborState::ReadyForMessages);
        assert_eq!(neighbor.state(), NeighborState::MarkedForDisconnect);
        neighbor.set_state(NeighborState::Handshaking);
        assert_eq!(neighbor.state(), NeighborState::MarkedForDisconnect);
    }

    #[test]
    fn test_unvalidated_transitions_are_allowed() {
        let neighbor = handle(10);
        neighbor.set_state(NeighborState::ReadyForMessages);
        neighbor.set_state(NeighborState::Handshaking);
        assert_eq!(neighbor.state(), NeighborState::Handshaking);
    }

    #[test]
    fn test_send_queue_drops_new_when_full() {
        let neighbor = handle(2);
        assert!(neighbor.send(vec![1]));
        assert!(neighbor.send(vec![2]));
        assert!(!neighbor.send(vec![3]));
        assert_eq!(neighbor.send_queue_len(), 2);
        assert_eq!(neighbor.metrics().snapshot().dropped_send_packets, 1);
        assert_eq!(neighbor.queued_frames(), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_write_interest_only_cleared_when_idle() {
        let neighbor = handle(10);
        assert!(!neighbor.write_interest());
        neighbor.send(vec![1]);
        assert!(neighbor.write_interest());
        assert!(!neighbor.disable_write_interest_if_idle());
        neighbor.pop_frame();
        assert!(neighbor.disable_write_interest_if_idle());
        assert!(!neighbor.write_interest());
    }

    #[test]
    fn test_identity() {
        let inbound = NeighborHandle::new(ConnectionId(2), "10.0.0.2", None, 10);
        assert_eq!(inbound.identity(), "10.0.0.2:?");
        inbound.set_remote_server_port(14600);
        assert_eq!(inbound.identity(), "10.0.0.2:14600");
    }

    #[tokio::test]
    async fn test_send_wakes_io_task() {
        let neighbor = handle(10);
        neighbor.send(vec![1]);
        // the permit stored by notify_one completes the next wait immediately
        tokio::time::timeout(Duration::from_secs(1), neighbor.io_waker().notified())
            .await
            .expect("send should wake the connection task");
    }

    #[tokio::test]
    async fn test_cross_thread_send() {
        let neighbor = handle(1000);
        let mut tasks = Vec::new();
        for t in 0..4u8 {
            let n = neighbor.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..100u8 {
                    n.send(vec![t, i]);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(neighbor.send_queue_len(), 400);
    }
}
