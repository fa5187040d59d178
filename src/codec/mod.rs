//! Binary envelope codec
//!
//! Serializes an [`AudioChunk`] into a self-describing binary envelope for
//! the transport, and back. Encoding is pure and deterministic and
//! round-trips losslessly: `decode(encode(x)) == x` for every valid chunk,
//! including a zero-length payload.
//!
//! Wire layout (integers big-endian):
//!
//! ```text
//! magic    [u8; 2]  = "PT"
//! version  u8       = 1
//! sender   u8 len + UTF-8 bytes
//! rtag     u8       (0 = broadcast, 1 = peer)
//! peer     u8 len + UTF-8 bytes     only when rtag == 1
//! sequence u64
//! captured u64      unix milliseconds
//! payload  u32 len + bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::chunk::{AudioChunk, PeerId, Recipient};
use crate::constants::{MAX_ID_BYTES, MAX_PAYLOAD_BYTES};
use crate::error::CodecError;

const MAGIC: [u8; 2] = *b"PT";
const VERSION: u8 = 1;

const RECIPIENT_BROADCAST: u8 = 0;
const RECIPIENT_PEER: u8 = 1;

/// Encode a chunk into a transport-ready envelope
pub fn encode(chunk: &AudioChunk) -> Result<Bytes, CodecError> {
    if chunk.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge(chunk.payload.len()));
    }

    let mut buf = BytesMut::with_capacity(32 + chunk.payload.len());
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    put_id(&mut buf, &chunk.sender)?;
    match &chunk.recipient {
        Recipient::Broadcast => buf.put_u8(RECIPIENT_BROADCAST),
        Recipient::Peer(peer) => {
            buf.put_u8(RECIPIENT_PEER);
            put_id(&mut buf, peer)?;
        }
    }
    buf.put_u64(chunk.sequence);
    buf.put_u64(chunk.captured_at);
    buf.put_u32(chunk.payload.len() as u32);
    buf.put_slice(&chunk.payload);

    Ok(buf.freeze())
}

/// Decode an envelope back into a chunk
///
/// Errors are local to this envelope; callers skip the malformed chunk and
/// keep processing the stream.
pub fn decode(envelope: &[u8]) -> Result<AudioChunk, CodecError> {
    let mut buf = envelope;

    let magic = take(&mut buf, 2, "magic")?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic([magic[0], magic[1]]));
    }

    let version = take(&mut buf, 1, "version")?[0];
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let sender = get_id(&mut buf, "sender")?;
    let recipient = match take(&mut buf, 1, "recipient tag")?[0] {
        RECIPIENT_BROADCAST => Recipient::Broadcast,
        RECIPIENT_PEER => Recipient::Peer(get_id(&mut buf, "recipient")?),
        tag => return Err(CodecError::BadRecipientTag(tag)),
    };

    let sequence = get_u64(&mut buf, "sequence")?;
    let captured_at = get_u64(&mut buf, "captured_at")?;

    let payload_len = get_u32(&mut buf, "payload length")? as usize;
    if payload_len > MAX_PAYLOAD_BYTES {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }
    let payload = Bytes::copy_from_slice(take(&mut buf, payload_len, "payload")?);

    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes(buf.len()));
    }

    Ok(AudioChunk {
        sender,
        recipient,
        sequence,
        captured_at,
        payload,
    })
}

fn put_id(buf: &mut BytesMut, id: &PeerId) -> Result<(), CodecError> {
    let bytes = id.as_str().as_bytes();
    if bytes.is_empty() {
        return Err(CodecError::InvalidId("empty identifier".to_string()));
    }
    if bytes.len() > MAX_ID_BYTES {
        return Err(CodecError::InvalidId(format!(
            "identifier too long: {} bytes",
            bytes.len()
        )));
    }
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
    Ok(())
}

fn get_id(buf: &mut &[u8], field: &'static str) -> Result<PeerId, CodecError> {
    let len = take(buf, 1, field)?[0] as usize;
    if len == 0 {
        return Err(CodecError::InvalidId("empty identifier".to_string()));
    }
    let raw = take(buf, len, field)?;
    let text = std::str::from_utf8(raw)
        .map_err(|e| CodecError::InvalidId(format!("{field}: {e}")))?;
    Ok(PeerId::new(text))
}

fn take<'a>(buf: &mut &'a [u8], n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
    if buf.len() < n {
        return Err(CodecError::Truncated {
            field,
            needed: n - buf.len(),
        });
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn get_u64(buf: &mut &[u8], field: &'static str) -> Result<u64, CodecError> {
    let mut raw = take(buf, 8, field)?;
    Ok(raw.get_u64())
}

fn get_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, CodecError> {
    let mut raw = take(buf, 4, field)?;
    Ok(raw.get_u32())
}
