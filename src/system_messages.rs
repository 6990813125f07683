//! Reliable, ordered delivery of system messages on top of the (unreliable) control stream.
//!
//! The sender assigns a strictly increasing sequence number per association starting at 1 and
//!  keeps every message in an in-memory buffer until it is cumulatively acknowledged; the
//!  owning control sink retransmits the buffer periodically. The receiver tracks the highest
//!  gap-free sequence number it dispatched and acknowledges cumulatively; out-of-order
//!  messages are buffered until the gap fills. A NACK is sent as a hint when a gap is
//!  detected, but correctness never relies on it - retransmission alone closes gaps.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::control_messages::ControlMessage;

/// A system payload handed to the control sink for reliable delivery.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SystemSend {
    pub serializer: i32,
    pub manifest: String,
    pub payload: Bytes,
}

/// The control sink fails with this error when the unacknowledged window overflows; the peer
///  is quarantined in response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SystemMessageBufferOverflow {
    pub capacity: usize,
}
impl Display for SystemMessageBufferOverflow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "system message buffer overflowed its capacity of {} unacknowledged messages", self.capacity)
    }
}
impl std::error::Error for SystemMessageBufferOverflow {}

/// Sender-side state, owned by a single control sink task - no internal locking.
pub struct SystemMessageDelivery {
    capacity: usize,
    next_seq: u64,
    unacked: BTreeMap<u64, ControlMessage>,
}

impl SystemMessageDelivery {
    pub fn new(capacity: usize) -> SystemMessageDelivery {
        SystemMessageDelivery {
            capacity,
            next_seq: 1,
            unacked: BTreeMap::default(),
        }
    }

    /// Assign the next sequence number and buffer the message for retransmission. The returned
    ///  reference is the wire message for the initial transmission.
    pub fn register(&mut self, send: SystemSend) -> anyhow::Result<&ControlMessage> {
        if self.unacked.len() >= self.capacity {
            return Err(SystemMessageBufferOverflow { capacity: self.capacity }.into());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.unacked.insert(seq, ControlMessage::SystemEnvelope {
            seq,
            serializer: send.serializer,
            manifest: send.manifest,
            payload: send.payload,
        });
        Ok(self.unacked.get(&seq).expect("just inserted"))
    }

    /// Cumulative ack: everything up to and including `seq` leaves the buffer.
    pub fn on_ack(&mut self, seq: u64) {
        self.unacked = self.unacked.split_off(&(seq + 1));
    }

    pub fn unacknowledged(&self) -> impl Iterator<Item = &ControlMessage> {
        self.unacked.values()
    }

    pub fn unacknowledged_from(&self, seq: u64) -> impl Iterator<Item = &ControlMessage> {
        self.unacked.range(seq..).map(|(_, msg)| msg)
    }

    pub fn num_unacknowledged(&self) -> usize {
        self.unacked.len()
    }
}

/// What the receiver should do after processing one inbound system envelope.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckerVerdict {
    /// messages that became deliverable, in sequence order
    pub deliver: Vec<ControlMessage>,
    /// cumulative ack to send back
    pub ack: u64,
    /// gap hint to send back, if a gap was (still) open
    pub nack: Option<u64>,
}

/// Receiver-side state, owned by the inbound control pipeline - no internal locking. One
///  instance per peer incarnation; a reincarnated peer starts over at sequence number 1.
#[derive(Default)]
pub struct SystemMessageAcker {
    last_delivered: u64,
    buffered: BTreeMap<u64, ControlMessage>,
}

impl SystemMessageAcker {
    pub fn new() -> SystemMessageAcker {
        Default::default()
    }

    pub fn on_system_envelope(&mut self, seq: u64, message: ControlMessage) -> AckerVerdict {
        if seq <= self.last_delivered {
            // duplicate of something already dispatched: the peer is retransmitting, so our
            //  ack apparently got lost - re-ack
            return AckerVerdict {
                deliver: Vec::new(),
                ack: self.last_delivered,
                nack: None,
            };
        }

        if seq == self.last_delivered + 1 {
            let mut deliver = vec![message];
            self.last_delivered = seq;

            // the new message may have filled the gap in front of buffered ones
            while let Some(buffered) = self.buffered.remove(&(self.last_delivered + 1)) {
                self.last_delivered += 1;
                deliver.push(buffered);
            }

            AckerVerdict {
                deliver,
                ack: self.last_delivered,
                nack: if self.buffered.is_empty() { None } else { Some(self.last_delivered + 1) },
            }
        }
        else {
            self.buffered.insert(seq, message);
            AckerVerdict {
                deliver: Vec::new(),
                ack: self.last_delivered,
                nack: Some(self.last_delivered + 1),
            }
        }
    }
}
