use bytes::Bytes;

use crate::buffers::object_pool::ObjectPool;
use crate::node_addr::Address;

/// Routing metadata plus serialized payload for one outbound message. Instances are reusable:
///  they are acquired from an [OutboundEnvelopePool] at the send call and released by the
///  outbound sink once the frame is on the wire.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct OutboundEnvelope {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub recipient_address: Option<Address>,
    pub serializer: i32,
    pub manifest: String,
    pub message: Bytes,
}

impl OutboundEnvelope {
    fn clear(&mut self) {
        self.sender = None;
        self.recipient = None;
        self.recipient_address = None;
        self.serializer = 0;
        self.manifest.clear();
        self.message = Bytes::new();
    }
}

/// Decoded counterpart on the receiving side, filled by the decoder and consumed by the
///  dispatcher. Released back to its pool after dispatch returns.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InboundEnvelope {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub originating_uid: u64,
    pub serializer: i32,
    pub manifest: String,
    pub payload: Bytes,
}

impl InboundEnvelope {
    fn clear(&mut self) {
        self.sender = None;
        self.recipient = None;
        self.originating_uid = 0;
        self.serializer = 0;
        self.manifest.clear();
        self.payload = Bytes::new();
    }
}

pub struct OutboundEnvelopePool(ObjectPool<OutboundEnvelope>);
impl OutboundEnvelopePool {
    pub fn new(max_pooled: usize) -> OutboundEnvelopePool {
        OutboundEnvelopePool(ObjectPool::new(max_pooled, OutboundEnvelope::default))
    }

    pub fn acquire(&self) -> OutboundEnvelope {
        self.0.acquire()
    }

    pub fn release(&self, mut envelope: OutboundEnvelope) {
        envelope.clear();
        self.0.release(envelope);
    }
}

pub struct InboundEnvelopePool(ObjectPool<InboundEnvelope>);
impl InboundEnvelopePool {
    pub fn new(max_pooled: usize) -> InboundEnvelopePool {
        InboundEnvelopePool(ObjectPool::new(max_pooled, InboundEnvelope::default))
    }

    pub fn acquire(&self) -> InboundEnvelope {
        self.0.acquire()
    }

    pub fn release(&self, mut envelope: InboundEnvelope) {
        envelope.clear();
        self.0.release(envelope);
    }
}
