//! Envelope framing. One frame per user message, network byte order:
//!
//! ```ascii
//! 0:  protocol version (u8) = 0
//! 1:  flags (u8):
//!     * bit 0: manifest is a compressed id
//!     * bit 1: recipient is a compressed id
//!     * bit 2: sender is a compressed id
//!     * 3-7: unused, must be 0
//! 2:  originating UID (u64)
//! 10: serializer id (i32)
//! 14: sender    (length-prefixed utf-8, or compressed id (i32) per flags)
//! *:  recipient (length-prefixed utf-8, or compressed id (i32) per flags)
//! *:  manifest  (length-prefixed utf-8, or compressed id (i32) per flags)
//! *:  payload (remainder of the frame)
//! ```
//!
//! Absent sender / recipient are encoded as zero-length strings - actor paths are never
//!  empty, so there is no ambiguity.

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};

use crate::compression::{InboundCompression, OutboundCompression};
use crate::envelope::{InboundEnvelope, OutboundEnvelope};

pub const PROTOCOL_VERSION: u8 = 0;

const FLAG_COMPRESSED_MANIFEST: u8 = 1;
const FLAG_COMPRESSED_RECIPIENT: u8 = 1 << 1;
const FLAG_COMPRESSED_SENDER: u8 = 1 << 2;

const LITERAL_PREFIX_LEN: usize = size_of::<u32>();
const COMPRESSED_ID_LEN: usize = size_of::<i32>();
const FIXED_HEADER_LEN: usize = 2 + size_of::<u64>() + size_of::<i32>();

enum Field<'a> {
    Literal(&'a str),
    Compressed(u32),
}
impl Field<'_> {
    fn encoded_len(&self) -> usize {
        match self {
            Field::Literal(s) => LITERAL_PREFIX_LEN + s.len(),
            Field::Compressed(_) => COMPRESSED_ID_LEN,
        }
    }

    fn ser(&self, buf: &mut BytesMut) {
        match self {
            Field::Literal(s) => {
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Field::Compressed(id) => {
                buf.put_i32(*id as i32);
            }
        }
    }
}

/// Write `envelope` as one frame into `buf`. The compression handle decides per field whether
///  the literal string or an advertised id goes on the wire.
pub fn encode(
    envelope: &OutboundEnvelope,
    originating_uid: u64,
    compression: &dyn OutboundCompression,
    max_frame_len: usize,
    buf: &mut BytesMut,
) -> anyhow::Result<()> {
    let mut flags = 0u8;

    let sender = match envelope.sender.as_deref() {
        Some(path) => match compression.compress_actor_ref(path) {
            Some(id) => {
                flags |= FLAG_COMPRESSED_SENDER;
                Field::Compressed(id)
            }
            None => Field::Literal(path),
        },
        None => Field::Literal(""),
    };
    let recipient = match envelope.recipient.as_deref() {
        Some(path) => match compression.compress_actor_ref(path) {
            Some(id) => {
                flags |= FLAG_COMPRESSED_RECIPIENT;
                Field::Compressed(id)
            }
            None => Field::Literal(path),
        },
        None => Field::Literal(""),
    };
    let manifest = match compression.compress_manifest(&envelope.manifest) {
        Some(id) => {
            flags |= FLAG_COMPRESSED_MANIFEST;
            Field::Compressed(id)
        }
        None => Field::Literal(&envelope.manifest),
    };

    let frame_len = FIXED_HEADER_LEN
        + sender.encoded_len()
        + recipient.encoded_len()
        + manifest.encoded_len()
        + envelope.message.len();
    if frame_len > max_frame_len {
        bail!("envelope for {:?} does not fit into a frame: {} > {} bytes",
            envelope.recipient, frame_len, max_frame_len);
    }

    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(flags);
    buf.put_u64(originating_uid);
    buf.put_i32(envelope.serializer);
    sender.ser(buf);
    recipient.ser(buf);
    manifest.ser(buf);
    buf.put_slice(&envelope.message);
    Ok(())
}

/// Parse one frame, resolving compressed ids through the inbound table. An id the table does
///  not know is a hard error - the caller drops the envelope (and only the envelope).
pub fn decode(
    buf: &mut impl Buf,
    compression: &dyn InboundCompression,
    out: &mut InboundEnvelope,
) -> anyhow::Result<()> {
    let version = buf.try_get_u8()?;
    if version != PROTOCOL_VERSION {
        bail!("unsupported protocol version {}", version);
    }
    let flags = buf.try_get_u8()?;

    out.originating_uid = buf.try_get_u64()?;
    out.serializer = buf.try_get_i32()?;

    out.sender = if flags & FLAG_COMPRESSED_SENDER != 0 {
        Some(try_read_compressed_ref(buf, compression)?)
    }
    else {
        try_read_literal(buf)?
    };
    out.recipient = if flags & FLAG_COMPRESSED_RECIPIENT != 0 {
        Some(try_read_compressed_ref(buf, compression)?)
    }
    else {
        try_read_literal(buf)?
    };
    out.manifest = if flags & FLAG_COMPRESSED_MANIFEST != 0 {
        let id = try_read_id(buf)?;
        compression.decompress_manifest(id)
            .ok_or_else(|| anyhow!("unknown compressed manifest id {}", id))?
    }
    else {
        try_read_literal(buf)?.unwrap_or_default()
    };

    out.payload = buf.copy_to_bytes(buf.remaining());
    Ok(())
}

fn try_read_id(buf: &mut impl Buf) -> anyhow::Result<u32> {
    let id = buf.try_get_i32()?;
    if id < 0 {
        bail!("negative compressed id {}", id);
    }
    Ok(id as u32)
}

fn try_read_compressed_ref(buf: &mut impl Buf, compression: &dyn InboundCompression) -> anyhow::Result<String> {
    let id = try_read_id(buf)?;
    compression.decompress_actor_ref(id)
        .ok_or_else(|| anyhow!("unknown compressed actor ref id {}", id))
}

fn try_read_literal(buf: &mut impl Buf) -> anyhow::Result<Option<String>> {
    let len = buf.try_get_u32()? as usize;
    if buf.remaining() < len {
        bail!("truncated frame: string field of {} bytes, {} remaining", len, buf.remaining());
    }
    if len == 0 {
        return Ok(None);
    }
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    let s = String::from_utf8(raw)
        .map_err(|_| anyhow!("string field is not valid utf-8"))?;
    Ok(Some(s))
}
