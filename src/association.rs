use std::sync::{Arc, OnceLock, RwLock, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffers::buffer_pool::EnvelopeBufferPool;
use crate::compression::{NoOutboundCompression, OutboundCompression, OutboundCompressionTable};
use crate::config::RemotingConfig;
use crate::control_messages::ControlMessage;
use crate::driver::{MediaDriver, LARGE_STREAM_ID, ORDINARY_STREAM_ID};
use crate::envelope::{OutboundEnvelope, OutboundEnvelopePool};
use crate::events::{TransportEvent, TransportEventNotifier};
use crate::node_addr::{Address, UniqueAddress};
use crate::outbound::{self, ControlSend};
use crate::system_messages::SystemSend;
use crate::wildcard::WildcardMatcher;

/// Everything an [Association] needs to materialize its outbound sinks. Built once in
///  `Transport::start` and shared by the registry and all associations.
pub struct OutboundSetup {
    pub local_address: UniqueAddress,
    pub config: Arc<RemotingConfig>,
    pub driver: Arc<MediaDriver>,
    pub matcher: Arc<WildcardMatcher>,
    pub events: Arc<TransportEventNotifier>,
    pub ordinary_buffers: Arc<EnvelopeBufferPool>,
    pub large_buffers: Arc<EnvelopeBufferPool>,
    pub outbound_envelopes: Arc<OutboundEnvelopePool>,
    pub kill_switch: broadcast::Sender<()>,
}

impl OutboundSetup {
    pub fn new_outbound_compression(&self) -> Arc<dyn OutboundCompression> {
        if self.config.compression_enabled {
            Arc::new(OutboundCompressionTable::new())
        }
        else {
            Arc::new(NoOutboundCompression)
        }
    }
}

/// The one-shot future for a peer incarnation's UID. It transitions None -> Some exactly once;
///  a new incarnation gets a fresh instance. Readers see the current value with a single
///  borrow, writers race through [UidPromise::complete] with first-one-wins semantics.
pub struct UidPromise {
    cell: watch::Sender<Option<UniqueAddress>>,
}

impl UidPromise {
    fn new_pending() -> UidPromise {
        UidPromise {
            cell: watch::channel(None).0,
        }
    }

    fn new_completed(peer: UniqueAddress) -> UidPromise {
        UidPromise {
            cell: watch::channel(Some(peer)).0,
        }
    }

    pub fn get(&self) -> Option<UniqueAddress> {
        self.cell.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UniqueAddress>> {
        self.cell.subscribe()
    }

    fn complete(&self, peer: UniqueAddress) -> bool {
        self.cell.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(peer);
                true
            }
            else {
                false
            }
        })
    }
}

/// Immutable snapshot of the per-peer state. The snapshot as a whole is replaced through a
///  compare-and-set on the owning [Association]; readers always observe a consistent view and
///  never block writers for long.
pub struct AssociationState {
    /// 1-based, incremented whenever the handshake completes with a UID different from the
    ///  current one. Strictly monotonic over the life of the association.
    pub incarnation: u32,
    uid_promise: Arc<UidPromise>,
    /// UIDs banned for the life of this association, with the instant of the ban. Entries are
    ///  never removed.
    pub quarantined: FxHashMap<u64, Instant>,
    /// compression lookup for the encoder; the no-op sentinel once the peer is quarantined
    pub outbound_compression: Arc<dyn OutboundCompression>,
}

impl AssociationState {
    fn initial(outbound_compression: Arc<dyn OutboundCompression>) -> AssociationState {
        AssociationState {
            incarnation: 1,
            uid_promise: Arc::new(UidPromise::new_pending()),
            quarantined: FxHashMap::default(),
            outbound_compression,
        }
    }

    pub fn unique_remote_address(&self) -> Option<UniqueAddress> {
        self.uid_promise.get()
    }

    pub fn subscribe_uid(&self) -> watch::Receiver<Option<UniqueAddress>> {
        self.uid_promise.subscribe()
    }

    pub fn is_quarantined(&self, uid: u64) -> bool {
        self.quarantined.contains_key(&uid)
    }
}

/// Opaque handle for O(1) re-lookup of an association through the registry. Remote actor refs
///  cache this key instead of a pointer, so a stale cache can never outlive the registry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct AssociationKey(pub(crate) u32);

/// The per-peer facade: holds the current [AssociationState] snapshot and owns the three
///  lazily materialized outbound sinks (control, ordinary, large). Created by the registry on
///  first reference to a remote address; lives until transport shutdown.
pub struct Association {
    myself: Weak<Association>,
    setup: Arc<OutboundSetup>,
    remote_address: Address,
    key: AssociationKey,
    state: RwLock<Arc<AssociationState>>,
    control_sink: OnceLock<mpsc::Sender<ControlSend>>,
    ordinary_sink: OnceLock<mpsc::Sender<OutboundEnvelope>>,
    large_sink: OnceLock<mpsc::Sender<OutboundEnvelope>>,
    control_subject: broadcast::Sender<ControlMessage>,
}

impl Association {
    pub(crate) fn new(setup: Arc<OutboundSetup>, remote_address: Address, key: AssociationKey) -> Arc<Association> {
        let initial_state = AssociationState::initial(setup.new_outbound_compression());

        Arc::new_cyclic(|myself| Association {
            myself: myself.clone(),
            setup,
            remote_address,
            key,
            state: RwLock::new(Arc::new(initial_state)),
            control_sink: OnceLock::new(),
            ordinary_sink: OnceLock::new(),
            large_sink: OnceLock::new(),
            control_subject: broadcast::channel(1024).0,
        })
    }

    pub fn remote_address(&self) -> &Address {
        &self.remote_address
    }

    pub fn key(&self) -> AssociationKey {
        self.key
    }

    pub(crate) fn setup(&self) -> &Arc<OutboundSetup> {
        &self.setup
    }

    /// current state snapshot - a single read-lock acquisition, never held across await points
    pub fn state(&self) -> Arc<AssociationState> {
        self.state.read().unwrap().clone()
    }

    /// Replace the state snapshot iff it is still the expected one. All transitions go through
    ///  this; callers loop on conflict, re-deciding against the fresh snapshot.
    fn compare_and_set_state(&self, expected: &Arc<AssociationState>, new: AssociationState) -> bool {
        let mut current = self.state.write().unwrap();
        if Arc::ptr_eq(&current, expected) {
            *current = Arc::new(new);
            true
        }
        else {
            false
        }
    }

    /// The handle inbound stages use to re-publish control messages received from this peer;
    ///  the control sink subscribes for acks.
    pub fn control_subject(&self) -> broadcast::Receiver<ControlMessage> {
        self.control_subject.subscribe()
    }

    pub(crate) fn publish_control(&self, message: ControlMessage) {
        // no receiver is fine: the control sink has not been materialized (yet)
        let _ = self.control_subject.send(message);
    }

    /// Enqueue a user message into the ordinary or large sink, chosen by the recipient path.
    ///  Backpressure is the bounded queue; after `give_up_send_after` the message is dropped
    ///  with a warning. Messages to a quarantined incarnation are dropped silently.
    pub async fn send(&self, envelope: OutboundEnvelope) {
        let state = self.state();
        if let Some(peer) = state.unique_remote_address() {
            if state.is_quarantined(peer.uid) {
                debug!("dropping message to quarantined peer {:?}", peer);
                self.setup.outbound_envelopes.release(envelope);
                return;
            }
        }

        let is_large = envelope.recipient.as_deref()
            .map(|path| self.setup.matcher.matches(path))
            .unwrap_or(false);
        let sink = if is_large { self.large_sink() } else { self.ordinary_sink() };

        match sink.send_timeout(envelope, self.setup.config.give_up_send_after).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(envelope)) => {
                warn!("giving up sending a message to {:?} after {:?} - dropping", self.remote_address, self.setup.config.give_up_send_after);
                self.setup.outbound_envelopes.release(envelope);
            }
            Err(SendTimeoutError::Closed(envelope)) => {
                debug!("outbound sink for {:?} is closed (shutting down?) - dropping", self.remote_address);
                self.setup.outbound_envelopes.release(envelope);
            }
        }
    }

    /// Enqueue a transport-level protocol message onto the control sink.
    pub async fn send_control(&self, message: ControlMessage) {
        self.send_on_control_sink(ControlSend::Message(message)).await;
    }

    /// Enqueue a system payload for reliable, ordered delivery (control stream).
    pub async fn send_system(&self, send: SystemSend) {
        self.send_on_control_sink(ControlSend::System(send)).await;
    }

    async fn send_on_control_sink(&self, send: ControlSend) {
        match self.control_sink().send_timeout(send, self.setup.config.give_up_send_after).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("giving up sending a control message to {:?} after {:?} - dropping", self.remote_address, self.setup.config.give_up_send_after);
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("control sink for {:?} is closed (shutting down?) - dropping", self.remote_address);
            }
        }
    }

    /// Fulfill the pending UID promise. If it is already fulfilled with a different UID, the
    ///  peer was restarted: a new incarnation starts with a fresh (completed) promise, the
    ///  quarantined set is retained, and compression starts over.
    pub async fn complete_handshake(&self, peer: UniqueAddress) {
        loop {
            let current = self.state();
            match current.unique_remote_address() {
                None => {
                    if current.uid_promise.complete(peer.clone()) {
                        info!("handshake with {:?} completed", peer);
                        self.setup.events.publish(TransportEvent::HandshakeCompleted { peer: peer.clone() }).await;
                    }
                    // a racing caller may have completed the promise with a different uid:
                    //  re-check, and treat that case as a reincarnation
                    if current.unique_remote_address().map(|p| p.uid) == Some(peer.uid) {
                        return;
                    }
                }
                Some(existing) if existing.uid == peer.uid => {
                    return;
                }
                Some(existing) => {
                    let new_state = AssociationState {
                        incarnation: current.incarnation + 1,
                        uid_promise: Arc::new(UidPromise::new_completed(peer.clone())),
                        quarantined: current.quarantined.clone(),
                        outbound_compression: self.setup.new_outbound_compression(),
                    };
                    if self.compare_and_set_state(&current, new_state) {
                        info!("peer {:?} was restarted: uid {} -> {}, starting incarnation {}",
                            self.remote_address, existing.uid, peer.uid, current.incarnation + 1);
                        self.setup.events.publish(TransportEvent::HandshakeCompleted { peer }).await;
                        return;
                    }
                }
            }
        }
    }

    /// Ban the current peer incarnation. If `uid` is given and does not match the current
    ///  peer UID, the request is stale and ignored. Publishes a lifecycle event and notifies
    ///  the peer (best effort) so it can publish its own.
    pub async fn quarantine(&self, reason: &str, uid: Option<u64>) {
        loop {
            let current = self.state();
            let current_uid = match current.unique_remote_address() {
                Some(peer) => peer.uid,
                None => {
                    warn!("quarantine of {:?} requested before the handshake completed - there is no UID to ban yet: {}", self.remote_address, reason);
                    return;
                }
            };
            if let Some(uid) = uid {
                if uid != current_uid {
                    debug!("quarantine of {:?} requested for uid {} but the current incarnation is {} - ignoring", self.remote_address, uid, current_uid);
                    return;
                }
            }
            if current.is_quarantined(current_uid) {
                return;
            }

            let mut quarantined = current.quarantined.clone();
            quarantined.insert(current_uid, Instant::now());
            let new_state = AssociationState {
                incarnation: current.incarnation,
                uid_promise: current.uid_promise.clone(),
                quarantined,
                outbound_compression: Arc::new(NoOutboundCompression),
            };
            if self.compare_and_set_state(&current, new_state) {
                warn!("quarantining {:?} (uid {}): {}", self.remote_address, current_uid, reason);
                self.setup.events.publish(TransportEvent::PeerQuarantined {
                    remote: self.remote_address.clone(),
                    uid: Some(current_uid),
                    reason: reason.to_string(),
                }).await;
                self.send_control(ControlMessage::Quarantined {
                    from: self.setup.local_address.address.clone(),
                    to: self.remote_address.clone(),
                }).await;
                return;
            }
        }
    }

    fn myself(&self) -> Arc<Association> {
        self.myself.upgrade()
            .expect("an association method was called, so the Arc is alive")
    }

    fn control_sink(&self) -> &mpsc::Sender<ControlSend> {
        self.control_sink.get_or_init(|| {
            let (tx, rx) = mpsc::channel(self.setup.config.outbound_queue_capacity);
            let kill = self.setup.kill_switch.subscribe();
            tokio::spawn(outbound::run_control_sink(self.myself(), rx, kill));
            tx
        })
    }

    fn ordinary_sink(&self) -> &mpsc::Sender<OutboundEnvelope> {
        self.ordinary_sink.get_or_init(|| {
            let (tx, rx) = mpsc::channel(self.setup.config.outbound_queue_capacity);
            let kill = self.setup.kill_switch.subscribe();
            tokio::spawn(outbound::run_user_sink(self.myself(), ORDINARY_STREAM_ID, self.setup.ordinary_buffers.clone(), rx, kill));
            tx
        })
    }

    fn large_sink(&self) -> &mpsc::Sender<OutboundEnvelope> {
        self.large_sink.get_or_init(|| {
            let (tx, rx) = mpsc::channel(self.setup.config.outbound_queue_capacity);
            let kill = self.setup.kill_switch.subscribe();
            tokio::spawn(outbound::run_user_sink(self.myself(), LARGE_STREAM_ID, self.setup.large_buffers.clone(), rx, kill));
            tx
        })
    }
}
