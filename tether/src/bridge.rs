//! The correlation bridge.
//!
//! Each side of the channel owns one [`Bridge`]. An outbound call takes a
//! correlation id from a per-instance counter and parks a resolver in the
//! pending table; the receive task matches inbound response frames back to
//! their resolver. Inbound request frames are routed to bound handlers and
//! answered with a response frame carrying the same id.
//!
//! Unroutable traffic (foreign frames, requests for unbound operations,
//! responses matching no pending call) is dropped, not raised. The only
//! failure a caller ever observes is the optional timeout.

use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::Frame;
use crate::transport::Transport;

type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Rejection surfaced to a caller.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("no response for '{operation}' within {window:?}")]
    Timeout { operation: String, window: Duration },
}

/// Bridge options.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Reject calls that see no response within this window. `None` (or a
    /// zero duration) leaves unanswered calls pending forever.
    pub timeout: Option<Duration>,
    /// Queue calls issued before a transport is attached and flush them at
    /// attachment. With buffering off, such calls are never sent.
    pub buffer_when_detached: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            buffer_when_detached: true,
        }
    }
}

impl BridgeConfig {
    pub fn with_timeout(mut self, window: Duration) -> Self {
        self.timeout = Some(window);
        self
    }

    pub fn with_buffering(mut self, enabled: bool) -> Self {
        self.buffer_when_detached = enabled;
        self
    }
}

/// A call parked until attachment flushes it.
struct QueuedCall {
    frame: Frame,
    flushed: oneshot::Sender<()>,
}

/// Attachment state. Calls enqueue while detached and send directly once a
/// transport is attached; the transition drains the queue in issue order.
enum Link {
    Detached { queue: Vec<QueuedCall> },
    Attached { outbound: mpsc::UnboundedSender<Value> },
}

/// How `invoke` got its frame onto (or short of) the wire.
enum SendDisposition {
    /// Transmitted immediately.
    Sent,
    /// Queued while detached; fires when the attachment flush sends it.
    Parked(oneshot::Receiver<()>),
    /// Detached with buffering off; the frame was discarded.
    Dropped,
}

struct Inner {
    config: BridgeConfig,
    next_id: AtomicU64,
    pending: DashMap<String, oneshot::Sender<Value>>,
    handlers: DashMap<String, HandlerFn>,
    link: StdMutex<Link>,
}

/// One side's endpoint of the duplex call channel.
///
/// Cheap to clone; clones share the same pending table, handler registry,
/// and attachment state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    /// A bridge bound to its transport from birth (the guest shape).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Transport, config: BridgeConfig) -> Self {
        let bridge = Self::detached(config);
        bridge.attach(transport);
        bridge
    }

    /// A bridge with no transport yet (the host shape). Calls issued now are
    /// queued or discarded per [`BridgeConfig::buffer_when_detached`].
    pub fn detached(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(0),
                pending: DashMap::new(),
                handlers: DashMap::new(),
                link: StdMutex::new(Link::Detached { queue: Vec::new() }),
            }),
        }
    }

    /// Wire a transport in: install the receive task, then flush queued calls
    /// in the order they were issued.
    ///
    /// The flush runs under the attachment lock, so a call racing in during
    /// attachment cannot jump ahead of the queue. Attaching twice installs a
    /// second receive task on the new transport and finds an empty queue;
    /// redundant but safe.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, transport: Transport) {
        let Transport { outbound, inbound } = transport;

        tokio::spawn(run_dispatch(
            Arc::clone(&self.inner),
            inbound,
            outbound.clone(),
        ));

        let mut link = lock_link(&self.inner.link);
        let previous = std::mem::replace(
            &mut *link,
            Link::Attached {
                outbound: outbound.clone(),
            },
        );
        if let Link::Detached { queue } = previous {
            let flushed = queue.len();
            for call in queue {
                transmit(&outbound, call.frame);
                let _ = call.flushed.send(());
            }
            if flushed > 0 {
                tracing::debug!(calls = flushed, "flushed queued calls at attachment");
            }
        }
    }

    /// Register `handler` for `operation`, replacing any prior handler. There
    /// is no unbind.
    pub fn bind<F, Fut>(&self, operation: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let erased: HandlerFn = Arc::new(move |payload| handler(payload).boxed());
        self.inner.handlers.insert(operation.into(), erased);
    }

    /// Call `operation` on the remote side and await its result.
    ///
    /// The resolver is parked in the pending table before anything is sent,
    /// so a response cannot outrun its registration. With a configured
    /// timeout the clock starts when the frame is actually transmitted (at
    /// attachment, for a queued call). A call that can never be answered (no
    /// handler bound remotely, buffering off while detached) pends forever
    /// unless the timeout settles it.
    pub async fn invoke(
        &self,
        operation: impl Into<String>,
        payload: Value,
    ) -> Result<Value, CallError> {
        let operation = operation.into();
        let correlation_id = self
            .inner
            .next_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();

        let (resolve, resolved) = oneshot::channel();
        self.inner.pending.insert(correlation_id.clone(), resolve);

        let frame = Frame::request(correlation_id.clone(), operation.clone(), payload);

        let disposition = {
            let mut link = lock_link(&self.inner.link);
            match &mut *link {
                Link::Attached { outbound } => {
                    transmit(outbound, frame);
                    SendDisposition::Sent
                }
                Link::Detached { queue } if self.inner.config.buffer_when_detached => {
                    let (flushed, flush_done) = oneshot::channel();
                    queue.push(QueuedCall { frame, flushed });
                    SendDisposition::Parked(flush_done)
                }
                Link::Detached { .. } => {
                    tracing::debug!(
                        %correlation_id,
                        operation = %operation,
                        "call issued while detached with buffering off; it will never transmit"
                    );
                    SendDisposition::Dropped
                }
            }
        };

        match disposition {
            SendDisposition::Sent => {}
            SendDisposition::Parked(flush_done) => {
                if flush_done.await.is_err() {
                    // The queue entry was discarded without transmitting.
                    return never().await;
                }
            }
            SendDisposition::Dropped => return never().await,
        }

        match self.inner.config.timeout {
            Some(window) if !window.is_zero() => {
                match tokio::time::timeout(window, resolved).await {
                    Ok(Ok(value)) => Ok(value),
                    // Resolver gone without firing; nothing can settle this call.
                    Ok(Err(_)) => never().await,
                    Err(_) => {
                        // Settling removes the entry, so a late response finds
                        // nothing and is dropped.
                        self.inner.pending.remove(&correlation_id);
                        tracing::debug!(
                            %correlation_id,
                            operation = %operation,
                            ?window,
                            "call timed out"
                        );
                        Err(CallError::Timeout { operation, window })
                    }
                }
            }
            _ => match resolved.await {
                Ok(value) => Ok(value),
                Err(_) => never().await,
            },
        }
    }
}

/// Park a call that has no remaining path to settlement.
async fn never() -> Result<Value, CallError> {
    future::pending().await
}

/// A poisoned lock still holds a coherent `Link`; take it anyway.
fn lock_link(link: &StdMutex<Link>) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serialize and send one frame, fire-and-forget.
fn transmit(outbound: &mpsc::UnboundedSender<Value>, frame: Frame) {
    let wire = match serde_json::to_value(&frame) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(
                correlation_id = %frame.correlation_id,
                error = %e,
                "frame failed to serialize, dropping"
            );
            return;
        }
    };
    if outbound.send(wire).is_err() {
        tracing::warn!(
            correlation_id = %frame.correlation_id,
            "transport is gone, dropping frame"
        );
    }
}

/// Receive task, one per attached transport. Routes requests to handlers and
/// responses to their pending resolver. Each request is serviced on its own
/// task so a slow handler cannot stall dispatch.
async fn run_dispatch(
    inner: Arc<Inner>,
    mut inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Value>,
) {
    while let Some(raw) = inbound.recv().await {
        let Some(frame) = Frame::from_wire(raw) else {
            tracing::trace!("inbound value has no correlation id, dropping");
            continue;
        };
        let Frame {
            correlation_id,
            operation,
            payload,
        } = frame;

        match operation {
            Some(operation) => {
                let Some(handler) = inner.handlers.get(&operation).map(|h| h.value().clone())
                else {
                    tracing::debug!(
                        %correlation_id,
                        operation = %operation,
                        "no handler bound, dropping request"
                    );
                    continue;
                };
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let result = handler(payload).await;
                    transmit(&outbound, Frame::response(correlation_id, result));
                });
            }
            None => match inner.pending.remove(&correlation_id) {
                // Send to a caller that already timed out is a no-op.
                Some((_, resolve)) => {
                    let _ = resolve.send(payload);
                }
                None => {
                    tracing::trace!(
                        %correlation_id,
                        "response matches no pending call, dropping"
                    );
                }
            },
        }
    }
    tracing::trace!("transport closed, dispatch task exiting");
}
