//! Transport values the bridge consumes.
//!
//! A transport is one side of an ordered, fire-and-forget duplex channel: an
//! outbound sender the bridge pushes wire values into, and an inbound receiver
//! it drains. Delivery is asynchronous and order-preserving per transport;
//! there is no acknowledgment and no drop detection.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::JsonCodec;

/// One side of the duplex channel joining the two bridges.
pub struct Transport {
    pub(crate) outbound: mpsc::UnboundedSender<Value>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Value>,
}

impl Transport {
    /// Two linked in-process transports: values sent on one surface, in
    /// order, on the other's receive side. The reference wiring for tests
    /// and same-process host/guest splits.
    pub fn pair() -> (Transport, Transport) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (
            Transport {
                outbound: left_tx,
                inbound: right_rx,
            },
            Transport {
                outbound: right_tx,
                inbound: left_rx,
            },
        )
    }

    /// Wrap caller-owned channel halves. For integration layers that pump an
    /// environment-specific messaging API themselves.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<Value>,
        inbound: mpsc::UnboundedReceiver<Value>,
    ) -> Transport {
        Transport { outbound, inbound }
    }

    /// Adapt a byte duplex. Reader and writer tasks pump length-delimited
    /// JSON frames until the stream or the consuming bridge goes away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<R, W>(read: R, write: W) -> Transport
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

        tokio::spawn(async move {
            let mut frames = FramedRead::new(read, JsonCodec::<Value>::new());
            loop {
                match frames.next().await {
                    Some(Ok(value)) => {
                        if in_tx.send(value).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "transport read failed");
                        break;
                    }
                    None => {
                        tracing::debug!("transport stream closed");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut frames = FramedWrite::new(write, JsonCodec::<Value>::new());
            while let Some(value) = out_rx.recv().await {
                if let Err(e) = frames.send(value).await {
                    tracing::error!(error = %e, "transport write failed");
                    break;
                }
            }
        });

        Transport {
            outbound: out_tx,
            inbound: in_rx,
        }
    }
}
