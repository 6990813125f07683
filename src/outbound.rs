//! The outbound sink tasks owned by an [Association]: one per stream (control, ordinary,
//!  large). User sinks gate on the handshake; the control sink additionally runs the reliable
//!  system-message delivery. Each sink supervises itself with its own restart budget - when an
//!  outbound stream gives up, the *peer* is quarantined rather than taking the whole transport
//!  down.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::select;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, warn};

use crate::association::Association;
use crate::buffers::buffer_pool::EnvelopeBufferPool;
use crate::codec;
use crate::compression::NoOutboundCompression;
use crate::control_messages::{ControlMessage, CONTROL_SERIALIZER};
use crate::driver::{Publication, CONTROL_STREAM_ID};
use crate::envelope::OutboundEnvelope;
use crate::handshake;
use crate::restart_counter::RestartCounter;
use crate::system_messages::{SystemMessageBufferOverflow, SystemMessageDelivery, SystemSend};

/// What flows into the control sink.
#[derive(Debug, Clone)]
pub(crate) enum ControlSend {
    /// transport protocol message, sent as-is (fire and forget)
    Message(ControlMessage),
    /// system payload, delivered reliably and in order
    System(SystemSend),
}

pub(crate) async fn run_user_sink(
    association: Arc<Association>,
    stream_id: u8,
    buffers: Arc<EnvelopeBufferPool>,
    mut rx: mpsc::Receiver<OutboundEnvelope>,
    mut kill: broadcast::Receiver<()>,
) {
    let setup = association.setup().clone();
    let restarts = RestartCounter::new(setup.config.max_restarts, setup.config.restart_timeout);
    let publication = setup.driver.publication(association.remote_address().socket_addr, stream_id);

    loop {
        let finished = select! {
            _ = kill.recv() => return,
            r = run_user_sink_once(&association, &publication, &buffers, &mut rx) => r,
        };
        match finished {
            Ok(()) => return,
            Err(e) => {
                if restarts.attempt_restart() {
                    warn!("restarting outbound stream {} for {:?}: {}", stream_id, association.remote_address(), e);
                }
                else {
                    warn!("outbound stream {} for {:?} exhausted its restart budget: {}", stream_id, association.remote_address(), e);
                    association.quarantine("outbound stream restart budget exhausted", None).await;
                    return;
                }
            }
        }
    }
}

/// One incarnation of a user sink: gate each envelope on the handshake, encode, offer. The
///  queue is retained across restarts, so buffered messages survive a handshake timeout.
async fn run_user_sink_once(
    association: &Association,
    publication: &Publication,
    buffers: &EnvelopeBufferPool,
    rx: &mut mpsc::Receiver<OutboundEnvelope>,
) -> anyhow::Result<()> {
    let setup = association.setup();

    loop {
        let envelope = match rx.recv().await {
            None => return Ok(()),
            Some(envelope) => envelope,
        };

        let peer = match handshake::await_handshake(association, &setup.config).await {
            Ok(peer) => peer,
            Err(e) => {
                setup.outbound_envelopes.release(envelope);
                return Err(e);
            }
        };

        let state = association.state();
        if state.is_quarantined(peer.uid) {
            debug!("dropping queued message to quarantined peer {:?}", peer);
            setup.outbound_envelopes.release(envelope);
            continue;
        }

        let mut buf = buffers.acquire().await;
        match codec::encode(&envelope, setup.local_address.uid, state.outbound_compression.as_ref(), buffers.buf_size(), &mut buf) {
            Ok(()) => publication.offer(&buf).await,
            Err(e) => warn!("dropping outbound message to {:?}: {}", association.remote_address(), e),
        }
        buffers.release(buf);
        setup.outbound_envelopes.release(envelope);
    }
}

pub(crate) async fn run_control_sink(
    association: Arc<Association>,
    mut rx: mpsc::Receiver<ControlSend>,
    mut kill: broadcast::Receiver<()>,
) {
    let setup = association.setup().clone();
    let restarts = RestartCounter::new(setup.config.max_restarts, setup.config.restart_timeout);
    let publication = setup.driver.publication(association.remote_address().socket_addr, CONTROL_STREAM_ID);
    // control frames are bounded by the ordinary frame size
    let buffers = setup.ordinary_buffers.clone();

    loop {
        let finished = select! {
            _ = kill.recv() => return,
            r = run_control_sink_once(&association, &publication, &buffers, &mut rx) => r,
        };
        match finished {
            Ok(()) => return,
            Err(e) => {
                if e.downcast_ref::<SystemMessageBufferOverflow>().is_some() {
                    warn!("control stream for {:?} failed: {}", association.remote_address(), e);
                    association.quarantine("system message buffer overflow", None).await;
                    // restart with fresh delivery state; sends to the banned incarnation are
                    //  dropped, a future incarnation starts over cleanly
                    continue;
                }
                if restarts.attempt_restart() {
                    warn!("restarting control stream for {:?}: {}", association.remote_address(), e);
                }
                else {
                    warn!("control stream for {:?} exhausted its restart budget: {}", association.remote_address(), e);
                    association.quarantine("control stream restart budget exhausted", None).await;
                    return;
                }
            }
        }
    }
}

async fn run_control_sink_once(
    association: &Association,
    publication: &Publication,
    buffers: &EnvelopeBufferPool,
    rx: &mut mpsc::Receiver<ControlSend>,
) -> anyhow::Result<()> {
    let setup = association.setup();
    let local_uid = setup.local_address.uid;
    let local = setup.local_address.clone();
    let remote = association.remote_address().clone();

    let mut delivery = SystemMessageDelivery::new(setup.config.sys_msg_buffer_size);
    let mut delivery_incarnation = association.state().incarnation;
    let mut received_control = association.control_subject();
    let mut resend = interval(setup.config.system_message_resend_interval);

    loop {
        // a reincarnated peer starts over at sequence number 1
        let incarnation = association.state().incarnation;
        if incarnation != delivery_incarnation {
            debug!("peer {:?} reincarnated, resetting system message delivery", association.remote_address());
            delivery = SystemMessageDelivery::new(setup.config.sys_msg_buffer_size);
            delivery_incarnation = incarnation;
        }

        select! {
            send = rx.recv() => match send {
                None => return Ok(()),
                Some(ControlSend::Message(message)) => {
                    send_control_frame(&message, local_uid, publication, buffers).await;
                }
                Some(ControlSend::System(send)) => {
                    // the peer only accepts system messages once the handshake completed, so
                    //  bootstrap it here - protocol messages must not wait in our own queue
                    if association.state().unique_remote_address().is_none() {
                        let request = ControlMessage::HandshakeReq { from: local.clone(), to: remote.clone() };
                        send_control_frame(&request, local_uid, publication, buffers).await;
                    }
                    let message = delivery.register(send)?;
                    send_control_frame(message, local_uid, publication, buffers).await;
                }
            },
            _ = resend.tick() => {
                if delivery.num_unacknowledged() > 0 && association.state().unique_remote_address().is_none() {
                    let request = ControlMessage::HandshakeReq { from: local.clone(), to: remote.clone() };
                    send_control_frame(&request, local_uid, publication, buffers).await;
                }
                for message in delivery.unacknowledged() {
                    send_control_frame(message, local_uid, publication, buffers).await;
                }
            },
            received = received_control.recv() => match received {
                Ok(ControlMessage::SystemMessageAck { seq }) => {
                    delivery.on_ack(seq);
                }
                Ok(ControlMessage::SystemMessageNack { expected }) => {
                    debug!("peer {:?} reported a gap at system message {}", association.remote_address(), expected);
                    for message in delivery.unacknowledged_from(expected) {
                        send_control_frame(message, local_uid, publication, buffers).await;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("control subject for {:?} lagged by {} messages", association.remote_address(), n);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn send_control_frame(
    message: &ControlMessage,
    local_uid: u64,
    publication: &Publication,
    buffers: &EnvelopeBufferPool,
) {
    let mut payload = BytesMut::new();
    message.ser(&mut payload);
    let envelope = OutboundEnvelope {
        sender: None,
        recipient: None,
        recipient_address: None,
        serializer: CONTROL_SERIALIZER,
        manifest: String::new(),
        message: payload.freeze(),
    };

    let mut buf = buffers.acquire().await;
    match codec::encode(&envelope, local_uid, &NoOutboundCompression, buffers.buf_size(), &mut buf) {
        Ok(()) => publication.offer(&buf).await,
        Err(e) => warn!("dropping oversized control frame: {}", e),
    }
    buffers.release(buf);
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::time::timeout;

    use super::*;
    use crate::association::AssociationKey;
    use crate::compression::InboundCompressionTable;
    use crate::driver::{InboundFrame, MediaDriver, ORDINARY_STREAM_ID};
    use crate::envelope::InboundEnvelope;
    use crate::node_addr::Address;
    use crate::test_util::{test_outbound_setup_with, test_unique_address};

    /// receive one frame from the given subscription and decode the control message in it
    async fn recv_control(sub: &mut mpsc::Receiver<InboundFrame>) -> ControlMessage {
        let frame = timeout(Duration::from_secs(5), sub.recv()).await
            .expect("expected a control frame")
            .expect("subscription closed");
        let mut envelope = InboundEnvelope::default();
        let mut buf: &[u8] = &frame.frame;
        codec::decode(&mut buf, &InboundCompressionTable::new(), &mut envelope).unwrap();
        assert_eq!(envelope.serializer, CONTROL_SERIALIZER);

        let mut payload: &[u8] = &envelope.payload;
        ControlMessage::try_deser(&mut payload).unwrap()
    }

    #[tokio::test]
    async fn test_control_sink_puts_frames_on_the_wire() {
        let peer_driver = MediaDriver::start("127.0.0.1", 0, Duration::from_secs(20)).await.unwrap();
        let mut peer_control = peer_driver.add_subscription(CONTROL_STREAM_ID, 16);
        let peer_address = Address::new("peer", peer_driver.local_addr().unwrap());

        let setup = test_outbound_setup_with(|_| {}).await;
        let association = Association::new(setup, peer_address, AssociationKey(0));

        association.send_control(ControlMessage::SystemMessageAck { seq: 17 }).await;

        assert_eq!(recv_control(&mut peer_control).await, ControlMessage::SystemMessageAck { seq: 17 });
    }

    #[tokio::test]
    async fn test_user_sink_is_gated_until_handshake_completes() {
        let peer_driver = MediaDriver::start("127.0.0.1", 0, Duration::from_secs(20)).await.unwrap();
        let mut peer_control = peer_driver.add_subscription(CONTROL_STREAM_ID, 16);
        let mut peer_ordinary = peer_driver.add_subscription(ORDINARY_STREAM_ID, 16);
        let peer_address = Address::new("peer", peer_driver.local_addr().unwrap());

        let setup = test_outbound_setup_with(|config| {
            config.handshake_retry_interval = Duration::from_millis(50);
        }).await;
        let association = Association::new(setup.clone(), peer_address.clone(), AssociationKey(0));

        let mut envelope = setup.outbound_envelopes.acquire();
        envelope.recipient = Some("/user/x".to_string());
        envelope.message = Bytes::from_static(b"hello");
        association.send(envelope).await;

        // the gate injects handshake requests on the control stream...
        match recv_control(&mut peer_control).await {
            ControlMessage::HandshakeReq { from, to } => {
                assert_eq!(from, setup.local_address);
                assert_eq!(to, peer_address);
            }
            other => panic!("expected a handshake request, got {:?}", other),
        }
        // ...and holds the user message back
        assert!(timeout(Duration::from_millis(200), peer_ordinary.recv()).await.is_err());

        association.complete_handshake(test_unique_address(1, 99)).await;

        let frame = timeout(Duration::from_secs(5), peer_ordinary.recv()).await.unwrap().unwrap();
        let mut decoded = InboundEnvelope::default();
        let mut buf: &[u8] = &frame.frame;
        codec::decode(&mut buf, &InboundCompressionTable::new(), &mut decoded).unwrap();
        assert_eq!(decoded.recipient.as_deref(), Some("/user/x"));
        assert_eq!(&decoded.payload[..], b"hello");
        assert_eq!(decoded.originating_uid, setup.local_address.uid);
    }

    #[tokio::test]
    async fn test_system_messages_are_resent_until_acked() {
        let peer_driver = MediaDriver::start("127.0.0.1", 0, Duration::from_secs(20)).await.unwrap();
        let mut peer_control = peer_driver.add_subscription(CONTROL_STREAM_ID, 64);
        let peer_address = Address::new("peer", peer_driver.local_addr().unwrap());

        let setup = test_outbound_setup_with(|config| {
            config.system_message_resend_interval = Duration::from_millis(50);
        }).await;
        let association = Association::new(setup, peer_address, AssociationKey(0));

        association.send_system(SystemSend {
            serializer: 7,
            manifest: "sys".to_string(),
            payload: Bytes::from_static(b"m1"),
        }).await;

        // initial transmission plus at least one retransmission; handshake requests are
        //  interleaved while the uid promise is pending
        let mut num_transmissions = 0;
        while num_transmissions < 2 {
            match recv_control(&mut peer_control).await {
                ControlMessage::SystemEnvelope { seq, payload, .. } => {
                    assert_eq!(seq, 1);
                    assert_eq!(&payload[..], b"m1");
                    num_transmissions += 1;
                }
                ControlMessage::HandshakeReq { .. } => {}
                other => panic!("expected a system envelope, got {:?}", other),
            }
        }

        // after the ack the retransmissions stop
        association.publish_control(ControlMessage::SystemMessageAck { seq: 1 });
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(frame) = peer_control.try_recv() {
            let _ = frame; // drain retransmissions that were in flight before the ack
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(peer_control.try_recv().is_err());
    }
}
