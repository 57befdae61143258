//! Length-delimited JSON framing for byte-stream transports.
//!
//! Frames cross a byte stream as a 4-byte length prefix followed by a JSON
//! body. Works over any AsyncRead/AsyncWrite (pipes, sockets, in-memory
//! duplexes).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Serde-backed codec over [`LengthDelimitedCodec`].
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(body) => {
                let item = serde_json::from_slice(&body)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_bytes = body.len(), "encoding frame");
        self.inner.encode(Bytes::from(body), dst)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::protocol::Frame;

    #[test]
    fn roundtrips_a_request_frame() {
        let mut codec = JsonCodec::<Frame>::new();
        let mut buf = BytesMut::new();

        let frame = Frame::request("4", "resize", json!({ "w": 80 }));
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_buffer_waits_for_more() {
        let mut codec = JsonCodec::<Value>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(json!({ "correlationId": "1", "payload": [1, 2, 3] }), &mut buf)
            .unwrap();

        let cut = buf.len() - 3;
        let mut partial = buf.split_to(cut);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn frames_queue_back_to_back() {
        let mut codec = JsonCodec::<Value>::new();
        let mut buf = BytesMut::new();
        codec.encode(json!("first"), &mut buf).unwrap();
        codec.encode(json!("second"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), json!("first"));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), json!("second"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn non_json_body_is_an_error() {
        let mut raw = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .new_codec();
        let mut buf = BytesMut::new();
        raw.encode(Bytes::from_static(b"{not json"), &mut buf).unwrap();

        let mut codec = JsonCodec::<Value>::new();
        assert!(codec.decode(&mut buf).is_err());
    }
}
