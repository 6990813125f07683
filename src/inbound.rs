//! The inbound side: one pipeline per stream, each a chain of decode, quarantine filter and
//!  dispatch. The control pipeline additionally answers handshakes, tracks reliable
//!  system-message delivery, and fans control messages out to the junction's observers.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::codec;
use crate::compression::InboundCompressionTable;
use crate::control_messages::ControlMessage;
use crate::driver::CONTROL_STREAM_ID;
use crate::events::{CompressionKind, TransportEvent, TransportEventNotifier};
use crate::system_messages::SystemMessageAcker;
use crate::transport::{InboundContext, TransportInner};

/// Observer of inbound control messages. Observers are notified synchronously on the control
///  stream's task, in registration order - they must not block.
#[async_trait::async_trait]
pub trait ControlMessageObserver: Send + Sync {
    async fn notify(&self, message: &ControlMessage);
}

/// Fan-out point for inbound control messages.
pub struct ControlJunction {
    observers: RwLock<Vec<Arc<dyn ControlMessageObserver>>>,
}

impl ControlJunction {
    pub fn new() -> ControlJunction {
        ControlJunction {
            observers: Default::default(),
        }
    }

    pub fn attach(&self, observer: Arc<dyn ControlMessageObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    pub(crate) async fn notify_all(&self, message: &ControlMessage) {
        let observers = self.observers.read().unwrap().clone();
        for observer in &observers {
            observer.notify(message).await;
        }
    }
}

/// Built-in observer: reacts to a peer telling us it quarantined this node.
pub struct QuarantineObserver {
    ctx: Arc<dyn InboundContext>,
    events: Arc<TransportEventNotifier>,
}
impl QuarantineObserver {
    pub fn new(ctx: Arc<dyn InboundContext>, events: Arc<TransportEventNotifier>) -> QuarantineObserver {
        QuarantineObserver { ctx, events }
    }
}
#[async_trait::async_trait]
impl ControlMessageObserver for QuarantineObserver {
    async fn notify(&self, message: &ControlMessage) {
        if let ControlMessage::Quarantined { from, to } = message {
            if to == &self.ctx.local_address().address {
                info!("this system was quarantined by {:?}", from);
                self.ctx.association(from)
                    .quarantine("the peer has quarantined this system", None)
                    .await;
                self.events.publish(TransportEvent::ThisSystemQuarantined {
                    local: to.clone(),
                    remote: from.clone(),
                }).await;
            }
            else {
                debug!("ignoring a quarantine notification addressed to {:?} (this node is {:?})", to, self.ctx.local_address().address);
            }
        }
    }
}

/// Built-in observer: records compression advertisements in the advertising peer's outbound
///  table.
pub struct CompressionObserver {
    ctx: Arc<dyn InboundContext>,
    events: Arc<TransportEventNotifier>,
}
impl CompressionObserver {
    pub fn new(ctx: Arc<dyn InboundContext>, events: Arc<TransportEventNotifier>) -> CompressionObserver {
        CompressionObserver { ctx, events }
    }
}
#[async_trait::async_trait]
impl ControlMessageObserver for CompressionObserver {
    async fn notify(&self, message: &ControlMessage) {
        match message {
            ControlMessage::ActorRefCompressionAdvertisement { from, path, id } => {
                self.ctx.association(&from.address)
                    .state().outbound_compression
                    .advertise_actor_ref(path.clone(), *id);
                self.events.publish(TransportEvent::CompressionAdvertised {
                    peer: from.clone(),
                    kind: CompressionKind::ActorRef,
                    id: *id,
                }).await;
            }
            ControlMessage::ClassManifestCompressionAdvertisement { from, manifest, id } => {
                self.ctx.association(&from.address)
                    .state().outbound_compression
                    .advertise_manifest(manifest.clone(), *id);
                self.events.publish(TransportEvent::CompressionAdvertised {
                    peer: from.clone(),
                    kind: CompressionKind::ClassManifest,
                    id: *id,
                }).await;
            }
            _ => {}
        }
    }
}

/// The control stream pipeline. Compression tables and acker state are local to one run, so a
///  restart starts from clean tables.
pub(crate) async fn run_control_inbound(transport: Arc<TransportInner>) -> anyhow::Result<()> {
    let compression = InboundCompressionTable::new();
    let mut ackers: FxHashMap<u64, SystemMessageAcker> = FxHashMap::default();
    let mut subscription = transport.driver().add_subscription(CONTROL_STREAM_ID, transport.inbound_queue_depth());

    while let Some(frame) = subscription.recv().await {
        let mut envelope = transport.inbound_envelopes.acquire();
        let mut buf: &[u8] = &frame.frame;
        if let Err(e) = codec::decode(&mut buf, &compression, &mut envelope) {
            warn!("dropping undecodable control frame from {:?}: {}", frame.from, e);
            transport.inbound_envelopes.release(envelope);
            continue;
        }

        let uid = envelope.originating_uid;
        if transport.is_quarantined_uid(uid) {
            debug!("dropping control frame from quarantined uid {}", uid);
            transport.events().publish(TransportEvent::InboundDropped {
                uid,
                reason: "quarantined".to_string(),
            }).await;
            transport.inbound_envelopes.release(envelope);
            continue;
        }

        let mut payload: &[u8] = &envelope.payload;
        let message = match ControlMessage::try_deser(&mut payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping unparseable control message from {:?}: {}", frame.from, e);
                transport.inbound_envelopes.release(envelope);
                continue;
            }
        };
        transport.inbound_envelopes.release(envelope);

        handle_control_message(&transport, &mut ackers, uid, &message).await;
        transport.junction.notify_all(&message).await;
    }
    Ok(())
}

async fn handle_control_message(
    transport: &TransportInner,
    ackers: &mut FxHashMap<u64, SystemMessageAcker>,
    uid: u64,
    message: &ControlMessage,
) {
    match message {
        ControlMessage::HandshakeReq { from, to } => {
            if to == &transport.local_address().address {
                let association = transport.registry.set_uid(from);
                association.complete_handshake(from.clone()).await;
                association.send_control(ControlMessage::HandshakeRsp {
                    from: transport.local_address().clone(),
                }).await;
            }
            else {
                warn!("received a handshake request addressed to {:?}, but this node is {:?} - was a previous incarnation of this address meant? dropping",
                    to, transport.local_address().address);
            }
        }
        ControlMessage::HandshakeRsp { from } => {
            let association = transport.registry.set_uid(from);
            association.complete_handshake(from.clone()).await;
        }
        ControlMessage::SystemEnvelope { seq, .. } => {
            let Some(association) = transport.registry.association_by_uid(uid) else {
                warn!("received a system message from uid {} without a completed handshake - dropping", uid);
                return;
            };

            let verdict = ackers.entry(uid).or_default()
                .on_system_envelope(*seq, message.clone());

            for delivered in verdict.deliver {
                if let ControlMessage::SystemEnvelope { serializer, manifest, payload, .. } = delivered {
                    let mut envelope = transport.inbound_envelopes.acquire();
                    envelope.originating_uid = uid;
                    envelope.serializer = serializer;
                    envelope.manifest = manifest;
                    envelope.payload = payload;
                    transport.dispatcher.dispatch(&envelope).await;
                    transport.inbound_envelopes.release(envelope);
                }
            }

            association.send_control(ControlMessage::SystemMessageAck { seq: verdict.ack }).await;
            if let Some(expected) = verdict.nack {
                association.send_control(ControlMessage::SystemMessageNack { expected }).await;
            }
        }
        ControlMessage::SystemMessageAck { .. } | ControlMessage::SystemMessageNack { .. } => {
            if let Some(association) = transport.registry.association_by_uid(uid) {
                association.publish_control(message.clone());
            }
        }
        // Quarantined and the compression advertisements are handled by the junction's
        //  built-in observers
        _ => {}
    }
}

/// Pipeline for the ordinary and large streams: decode, filter, dispatch.
pub(crate) async fn run_user_inbound(transport: Arc<TransportInner>, stream_id: u8) -> anyhow::Result<()> {
    let compression = InboundCompressionTable::new();
    let mut subscription = transport.driver().add_subscription(stream_id, transport.inbound_queue_depth());

    while let Some(frame) = subscription.recv().await {
        let mut envelope = transport.inbound_envelopes.acquire();
        let mut buf: &[u8] = &frame.frame;
        if let Err(e) = codec::decode(&mut buf, &compression, &mut envelope) {
            warn!("dropping undecodable frame on stream {} from {:?}: {}", stream_id, frame.from, e);
            transport.inbound_envelopes.release(envelope);
            continue;
        }

        let uid = envelope.originating_uid;
        if transport.is_quarantined_uid(uid) {
            debug!("dropping message from quarantined uid {}", uid);
            transport.events().publish(TransportEvent::InboundDropped {
                uid,
                reason: "quarantined".to_string(),
            }).await;
            transport.inbound_envelopes.release(envelope);
            continue;
        }

        transport.dispatcher.dispatch(&envelope).await;
        transport.inbound_envelopes.release(envelope);
    }
    Ok(())
}
