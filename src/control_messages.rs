//! Transport-level protocol messages. They travel as the payload of regular frames on the
//!  control stream, marked by [CONTROL_SERIALIZER] and led by a one-byte kind discriminant.

use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::node_addr::{Address, UniqueAddress};

/// serializer id marking a frame's payload as a [ControlMessage]
pub const CONTROL_SERIALIZER: i32 = -1;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ControlMessage {
    /// first step of the handshake, re-sent periodically until a response is observed. `to` is
    ///  the address the sender believes it is talking to - a mismatch on the receiving side
    ///  points to a stale peer.
    HandshakeReq { from: UniqueAddress, to: Address },
    /// second step: fulfills the UID promise on the initiating side
    HandshakeRsp { from: UniqueAddress },
    /// notification that `from` has quarantined `to`
    Quarantined { from: Address, to: Address },
    /// peer advertises a compressed id for an actor ref it sees frequently
    ActorRefCompressionAdvertisement { from: UniqueAddress, path: String, id: u32 },
    /// peer advertises a compressed id for a class manifest it sees frequently
    ClassManifestCompressionAdvertisement { from: UniqueAddress, manifest: String, id: u32 },
    /// cumulative acknowledgement: all system messages up to and including `seq` are delivered
    SystemMessageAck { seq: u64 },
    /// optimization hint: the receiver is missing `expected` (correctness relies on
    ///  retransmission, not on this)
    SystemMessageNack { expected: u64 },
    /// a reliably-delivered system payload
    SystemEnvelope { seq: u64, serializer: i32, manifest: String, payload: Bytes },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum ControlMessageKind {
    HandshakeReq = 1,
    HandshakeRsp = 2,
    Quarantined = 3,
    ActorRefCompressionAdvertisement = 4,
    ClassManifestCompressionAdvertisement = 5,
    SystemMessageAck = 6,
    SystemMessageNack = 7,
    SystemEnvelope = 8,
}

impl ControlMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            ControlMessage::HandshakeReq { from, to } => {
                buf.put_u8(ControlMessageKind::HandshakeReq.into());
                from.ser(buf);
                to.ser(buf);
            }
            ControlMessage::HandshakeRsp { from } => {
                buf.put_u8(ControlMessageKind::HandshakeRsp.into());
                from.ser(buf);
            }
            ControlMessage::Quarantined { from, to } => {
                buf.put_u8(ControlMessageKind::Quarantined.into());
                from.ser(buf);
                to.ser(buf);
            }
            ControlMessage::ActorRefCompressionAdvertisement { from, path, id } => {
                buf.put_u8(ControlMessageKind::ActorRefCompressionAdvertisement.into());
                from.ser(buf);
                ser_string(path, buf);
                buf.put_u32(*id);
            }
            ControlMessage::ClassManifestCompressionAdvertisement { from, manifest, id } => {
                buf.put_u8(ControlMessageKind::ClassManifestCompressionAdvertisement.into());
                from.ser(buf);
                ser_string(manifest, buf);
                buf.put_u32(*id);
            }
            ControlMessage::SystemMessageAck { seq } => {
                buf.put_u8(ControlMessageKind::SystemMessageAck.into());
                buf.put_u64(*seq);
            }
            ControlMessage::SystemMessageNack { expected } => {
                buf.put_u8(ControlMessageKind::SystemMessageNack.into());
                buf.put_u64(*expected);
            }
            ControlMessage::SystemEnvelope { seq, serializer, manifest, payload } => {
                buf.put_u8(ControlMessageKind::SystemEnvelope.into());
                buf.put_u64(*seq);
                buf.put_i32(*serializer);
                ser_string(manifest, buf);
                buf.put_slice(payload);
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ControlMessage> {
        let kind = buf.try_get_u8()?;
        let kind = ControlMessageKind::try_from(kind)
            .map_err(|_| anyhow!("invalid control message kind: {}", kind))?;

        let result = match kind {
            ControlMessageKind::HandshakeReq => ControlMessage::HandshakeReq {
                from: UniqueAddress::try_deser(buf)?,
                to: Address::try_deser(buf)?,
            },
            ControlMessageKind::HandshakeRsp => ControlMessage::HandshakeRsp {
                from: UniqueAddress::try_deser(buf)?,
            },
            ControlMessageKind::Quarantined => ControlMessage::Quarantined {
                from: Address::try_deser(buf)?,
                to: Address::try_deser(buf)?,
            },
            ControlMessageKind::ActorRefCompressionAdvertisement => ControlMessage::ActorRefCompressionAdvertisement {
                from: UniqueAddress::try_deser(buf)?,
                path: try_deser_string(buf)?,
                id: buf.try_get_u32()?,
            },
            ControlMessageKind::ClassManifestCompressionAdvertisement => ControlMessage::ClassManifestCompressionAdvertisement {
                from: UniqueAddress::try_deser(buf)?,
                manifest: try_deser_string(buf)?,
                id: buf.try_get_u32()?,
            },
            ControlMessageKind::SystemMessageAck => ControlMessage::SystemMessageAck {
                seq: buf.try_get_u64()?,
            },
            ControlMessageKind::SystemMessageNack => ControlMessage::SystemMessageNack {
                expected: buf.try_get_u64()?,
            },
            ControlMessageKind::SystemEnvelope => ControlMessage::SystemEnvelope {
                seq: buf.try_get_u64()?,
                serializer: buf.try_get_i32()?,
                manifest: try_deser_string(buf)?,
                payload: buf.copy_to_bytes(buf.remaining()),
            },
        };
        Ok(result)
    }
}

fn ser_string(s: &str, buf: &mut BytesMut) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn try_deser_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.try_get_u32()? as usize;
    if buf.remaining() < len {
        return Err(anyhow!("truncated string: {} < {} bytes", buf.remaining(), len));
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| anyhow!("string is not valid utf-8"))
}
