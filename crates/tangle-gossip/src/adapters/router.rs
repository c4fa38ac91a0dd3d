//! # Neighbor Router
//!
//! Owns every peer connection of the node.
//!
//! ```text
//! accept / dial ──→ NeighborHandle (arena) ──→ connection task
//!                                                 │ select! { shutdown, waker, socket ready }
//!                                                 ├─ readable → Neighbor::read
//!                                                 └─ writable → Neighbor::write
//! ```
//!
//! A connection is only added to the connected map once its handshake is
//! accepted and it passes the slot, port and identity checks.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::domain::{
    encode_handshake, encode_heartbeat, GossipConfig, Handshake, HandshakePolicy, Heartbeat,
    NeighborState, NeighborUri,
};
use crate::events::{ConfigError, GossipError, NeighborError};
use crate::neighbor::{ConnectionId, Neighbor, NeighborHandle, WriteProgress};
use crate::ports::{MilestoneTracker, NeighborDirectory, SnapshotProvider, TransactionIntake};
use crate::service::scheduler::shutdown_signalled;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RouterState {
    /// Every open connection, finalized or not.
    arena: HashMap<ConnectionId, NeighborHandle>,
    /// Finalized neighbors by identity.
    connected: HashMap<String, NeighborHandle>,
    /// Wanted neighbors by identity.
    wanted: HashMap<String, NeighborUri>,
    /// Identities with a dial attempt or dialled connection in flight.
    dialing: HashSet<String>,
}

enum Event {
    Shutdown,
    Wake,
    Ready(std::io::Result<Ready>),
}

pub struct NeighborRouter {
    config: GossipConfig,
    policy: HandshakePolicy,
    intake: Arc<dyn TransactionIntake>,
    milestones: Arc<dyn MilestoneTracker>,
    snapshot: Arc<dyn SnapshotProvider>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    state: Mutex<RouterState>,
    next_id: AtomicU64,
    reconnect_now: Notify,
}

impl NeighborRouter {
    /// Binds the listener. The bound port is the one advertised in handshakes.
    pub async fn bind(
        config: GossipConfig,
        intake: Arc<dyn TransactionIntake>,
        milestones: Arc<dyn MilestoneTracker>,
        snapshot: Arc<dyn SnapshotProvider>,
    ) -> Result<Arc<Self>, GossipError> {
        config.validate()?;
        let policy = HandshakePolicy::new(config.mwm, config.coordinator_bytes()?);
        let wanted = config
            .neighbor_uris()?
            .into_iter()
            .map(|uri| (uri.identity(), uri))
            .collect();

        let addr = format!("{}:{}", config.listen_address, config.listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| GossipError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| GossipError::Bind { addr, source })?;
        info!(%local_addr, "neighbor router listening");

        Ok(Arc::new(Self {
            config,
            policy,
            intake,
            milestones,
            snapshot,
            local_addr,
            listener: Mutex::new(Some(listener)),
            state: Mutex::new(RouterState {
                wanted,
                ..RouterState::default()
            }),
            next_id: AtomicU64::new(1),
            reconnect_now: Notify::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts peers and dials wanted neighbors until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(listener) = self.listener.lock().take() else {
            error!("neighbor router is already running");
            return;
        };
        let mut reconnect = tokio::time::interval(self.config.reconnect_interval());
        reconnect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted connection");
                        self.spawn_connection(
                            stream,
                            addr.ip().to_string(),
                            None,
                            shutdown.clone(),
                        );
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = reconnect.tick() => self.dial_wanted(&shutdown),
                _ = self.reconnect_now.notified() => self.dial_wanted(&shutdown),
            }
        }

        let state = self.state.lock();
        for handle in state.arena.values() {
            handle.set_state(NeighborState::MarkedForDisconnect);
        }
        info!(connections = state.arena.len(), "neighbor router stopped");
    }

    /// Adds a wanted neighbor and dials it right away.
    ///
    /// Returns `false` if it was already wanted.
    pub fn add_neighbor(&self, uri: &str) -> Result<bool, ConfigError> {
        let uri: NeighborUri = uri.parse()?;
        let added = self
            .state
            .lock()
            .wanted
            .insert(uri.identity(), uri)
            .is_none();
        if added {
            self.reconnect_now.notify_one();
        }
        Ok(added)
    }

    /// Forgets a wanted neighbor and drops its connection.
    ///
    /// Returns `false` if it was not wanted.
    pub fn remove_neighbor(&self, uri: &str) -> Result<bool, ConfigError> {
        let uri: NeighborUri = uri.parse()?;
        let identity = uri.identity();
        let mut state = self.state.lock();
        let removed = state.wanted.remove(&identity).is_some();
        if let Some(handle) = state.connected.get(&identity) {
            info!(neighbor = %identity, "removing neighbor");
            handle.set_state(NeighborState::MarkedForDisconnect);
        }
        Ok(removed)
    }

    fn dial_wanted(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) {
        let targets: Vec<NeighborUri> = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let targets: Vec<NeighborUri> = state
                .wanted
                .iter()
                .filter(|(identity, _)| {
                    !state.connected.contains_key(*identity) && !state.dialing.contains(*identity)
                })
                .map(|(_, uri)| uri.clone())
                .collect();
            for uri in &targets {
                state.dialing.insert(uri.identity());
            }
            targets
        };

        for uri in targets {
            let router = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let connect = TcpStream::connect((uri.host.as_str(), uri.port));
                match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                    Ok(Ok(stream)) => {
                        debug!(neighbor = %uri, "connected");
                        router.spawn_connection(stream, uri.host.clone(), Some(uri.port), shutdown);
                    }
                    Ok(Err(e)) => {
                        debug!(neighbor = %uri, error = %e, "dial failed");
                        router.state.lock().dialing.remove(&uri.identity());
                    }
                    Err(_) => {
                        debug!(neighbor = %uri, "dial timed out");
                        router.state.lock().dialing.remove(&uri.identity());
                    }
                }
            });
        }
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        host: String,
        dialed_port: Option<u16>,
        shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable nagle");
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = NeighborHandle::new(id, host, dialed_port, self.config.send_queue_capacity);
        self.state.lock().arena.insert(id, handle.clone());

        let router = self.clone();
        tokio::spawn(async move {
            let result = router.serve(stream, handle.clone(), dialed_port, shutdown).await;
            match result {
                Ok(()) => debug!(neighbor = %handle.identity(), "connection closed"),
                Err(NeighborError::ConnectionClosed) => {
                    info!(neighbor = %handle.identity(), "neighbor disconnected")
                }
                Err(e) => warn!(neighbor = %handle.identity(), error = %e, "dropping neighbor"),
            }
            router.release(&handle, dialed_port);
        });
    }

    async fn serve(
        &self,
        stream: TcpStream,
        handle: NeighborHandle,
        dialed_port: Option<u16>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), NeighborError> {
        let mut neighbor =
            Neighbor::new(stream, handle.clone(), self.policy.clone(), self.intake.clone());
        handle.send(self.handshake_frame());
        let mut finalized = false;

        loop {
            if handle.state() == NeighborState::MarkedForDisconnect {
                return Ok(());
            }
            let interest = if handle.write_interest() || neighbor.has_partial_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let event = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => Event::Shutdown,
                _ = handle.io_waker().notified() => Event::Wake,
                ready = neighbor.channel().ready(interest) => Event::Ready(ready),
            };

            let ready = match event {
                Event::Shutdown => return Ok(()),
                Event::Wake => continue,
                Event::Ready(ready) => ready?,
            };

            if ready.is_readable() || ready.is_read_closed() {
                neighbor.read()?;
                if !finalized && handle.state() == NeighborState::ReadyForMessages {
                    finalized = true;
                    let advertised = neighbor.peer_handshake().server_socket_port;
                    self.finalize(&handle, dialed_port, advertised);
                }
            }
            if ready.is_writable() {
                Self::flush(&mut neighbor)?;
            }
        }
    }

    /// Writes queued frames until the socket would block or the queue is empty.
    fn flush(neighbor: &mut Neighbor<TcpStream>) -> Result<(), NeighborError> {
        loop {
            match neighbor.write()? {
                WriteProgress::Idle => {
                    if neighbor.handle().disable_write_interest_if_idle() {
                        return Ok(());
                    }
                }
                WriteProgress::Wrote(0) => return Ok(()),
                WriteProgress::Wrote(_) => {}
            }
        }
    }

    /// Admits a neighbor whose handshake was accepted, or marks it for disconnect.
    fn finalize(&self, handle: &NeighborHandle, dialed_port: Option<u16>, advertised_port: u16) {
        let identity = handle.identity();
        let mut state = self.state.lock();

        let rejection = if state.connected.len() >= self.config.max_neighbors {
            Some("no free neighbor slots")
        } else if dialed_port.is_some_and(|port| port != advertised_port) {
            Some("advertised server port differs from the dialled one")
        } else if state.connected.contains_key(&identity) {
            Some("already connected")
        } else if !self.config.auto_tethering && !state.wanted.contains_key(&identity) {
            Some("not a wanted neighbor")
        } else {
            None
        };

        if let Some(reason) = rejection {
            info!(neighbor = %identity, reason, "rejecting neighbor");
            handle.set_state(NeighborState::MarkedForDisconnect);
            return;
        }

        state.connected.insert(identity.clone(), handle.clone());
        drop(state);
        info!(
            neighbor = %identity,
            protocol_version = handle.protocol_version(),
            "neighbor connected"
        );
        handle.send(encode_heartbeat(&Heartbeat {
            first_solid_milestone_index: self.snapshot.initial_milestone_index(),
            last_solid_milestone_index: self.milestones.latest_solid_milestone_index(),
        }));
    }

    fn release(&self, handle: &NeighborHandle, dialed_port: Option<u16>) {
        handle.set_state(NeighborState::MarkedForDisconnect);
        let identity = handle.identity();
        let mut state = self.state.lock();
        state.arena.remove(&handle.id());
        if state
            .connected
            .get(&identity)
            .is_some_and(|connected| connected.id() == handle.id())
        {
            state.connected.remove(&identity);
        }
        if let Some(port) = dialed_port {
            state
                .dialing
                .remove(&format!("{}:{}", handle.host_address(), port));
        }
    }

    fn handshake_frame(&self) -> Vec<u8> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        encode_handshake(&Handshake::outbound(
            self.local_addr.port(),
            now_ms,
            self.policy.coordinator_address,
            self.policy.mwm,
        ))
    }

    /// Number of open connections, including ones still handshaking.
    pub fn connection_count(&self) -> usize {
        self.state.lock().arena.len()
    }
}

impl NeighborDirectory for NeighborRouter {
    fn connected_neighbors(&self) -> Vec<NeighborHandle> {
        self.state
            .lock()
            .connected
            .values()
            .filter(|handle| handle.state() == NeighborState::ReadyForMessages)
            .cloned()
            .collect()
    }
}
