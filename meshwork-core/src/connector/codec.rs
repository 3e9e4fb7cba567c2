//! Wire codec for external connectors
//!
//! Each datagram carries exactly one record: a 4-byte big-endian body length
//! followed by a MessagePack body with named fields. A bad datagram is dropped
//! on its own; the next one is decoded independently.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MeshError, Result};
use crate::message::Message;

/// Length prefix size in bytes
pub const HEADER_LEN: usize = 4;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM: usize = 65_507;

/// Encode a message into one framed record
pub fn encode_frame(message: &Message) -> Result<Bytes> {
    let body = rmp_serde::to_vec_named(message).map_err(|e| MeshError::Encode {
        reason: e.to_string(),
    })?;

    if HEADER_LEN + body.len() > MAX_DATAGRAM {
        return Err(MeshError::Encode {
            reason: format!("record of {} bytes exceeds datagram limit", body.len()),
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Strip and validate the length prefix, returning the body
pub fn frame_body(datagram: &[u8]) -> Result<&[u8]> {
    if datagram.len() < HEADER_LEN {
        return Err(MeshError::Decode {
            reason: format!("datagram of {} bytes has no header", datagram.len()),
        });
    }

    let mut header = &datagram[..HEADER_LEN];
    let declared = header.get_u32() as usize;
    let body = &datagram[HEADER_LEN..];
    if body.len() != declared {
        return Err(MeshError::Decode {
            reason: format!("length prefix {} but body has {} bytes", declared, body.len()),
        });
    }
    Ok(body)
}

type DecodeFn = dyn Fn(&[u8]) -> Result<Message> + Send + Sync;

/// Decoder for the payload type registered on an ingress connector
#[derive(Clone)]
pub struct PayloadDecoder {
    type_name: &'static str,
    decode: Arc<DecodeFn>,
}

impl PayloadDecoder {
    /// Decoder that only accepts bodies shaped like `T`
    pub fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            decode: Arc::new(|body: &[u8]| {
                let value: T = rmp_serde::from_slice(body).map_err(|e| MeshError::Decode {
                    reason: e.to_string(),
                })?;
                Message::encode(&value)
            }),
        }
    }

    /// Decode one framed datagram
    pub fn decode_frame(&self, datagram: &[u8]) -> Result<Message> {
        let body = frame_body(datagram)?;
        (self.decode)(body)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for PayloadDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadDecoder")
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tick {
        seq: u64,
        symbol: String,
    }

    #[test]
    fn test_registered_type_decodes() {
        let tick = Tick { seq: 9, symbol: "ABC".into() };
        let frame = encode_frame(&Message::encode(&tick).unwrap()).unwrap();

        let decoder = PayloadDecoder::of::<Tick>();
        let message = decoder.decode_frame(&frame).unwrap();
        assert_eq!(message.decode::<Tick>().unwrap(), tick);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let frame = encode_frame(&Message::text("HEY")).unwrap();
        let err = PayloadDecoder::of::<Tick>().decode_frame(&frame).unwrap_err();
        assert!(matches!(err, MeshError::Decode { .. }));

        // Dynamic payloads accept anything
        let message = PayloadDecoder::of::<Message>().decode_frame(&frame).unwrap();
        assert_eq!(message.as_str(), Some("HEY"));
    }

    #[test]
    fn test_truncated_datagram() {
        let frame = encode_frame(&Message::text("truncate me")).unwrap();
        assert!(frame_body(&frame[..frame.len() - 2]).is_err());
        assert!(frame_body(&frame[..2]).is_err());
    }
}
