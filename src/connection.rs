//! One persistent WebSocket connection multiplexing many in-flight requests.
//!
//! Requests are written one frame at a time through a shared sink. A single
//! background task reads reply frames and routes each one to the caller
//! waiting on its correlation id, so replies may complete in any order.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};

use crate::{
    pending::{Completion, PendingOperation, PendingTable},
    ClientOptions, DriverError, Result, RpcRequest, RpcResponse,
};

type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// State shared between callers and the receive loop.
struct Shared {
    pending: PendingTable,
    open: AtomicBool,
    log_rpc: AtomicBool,
}

impl Shared {
    /// Routes one reply frame to its pending operation.
    fn dispatch(&self, text: String) {
        #[cfg(feature = "tracing")]
        if self.log_rpc.load(Ordering::Relaxed) {
            tracing::trace!(frame = %text, "rpc frame received");
        }

        let response = match RpcResponse::decode(text.as_str()) {
            Ok(response) => response,
            Err(err) => {
                match RpcResponse::peek_id(&text).and_then(|id| self.pending.remove(&id)) {
                    Some(operation) => operation.complete(Err(err)),
                    None => {
                        #[cfg(feature = "tracing")]
                        log_dropped_frame(&text, &err);
                    }
                }
                return;
            }
        };

        #[cfg(feature = "tracing")]
        if let Some(error) = response.error().filter(|_| response.is_error()) {
            tracing::warn!(
                id = %response.id(),
                code = error.code,
                message = %error.message,
                "rpc error response"
            );
        }

        match self.pending.remove(response.id()) {
            Some(operation) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(id = %response.id(), method = %operation.method, "rpc reply correlated");
                operation.complete(Ok(response));
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(id = %response.id(), "dropping uncorrelated rpc frame");
            }
        }
    }
}

/// Frames that are valid JSON without an id are server pushes with no caller.
#[cfg(feature = "tracing")]
fn log_dropped_frame(text: &str, err: &DriverError) {
    if serde_json::from_str::<serde_json::Value>(text).is_ok() {
        tracing::debug!(error = %err, "dropping rpc frame without id");
    } else {
        tracing::warn!(error = %err, "dropping undecodable rpc frame");
    }
}

/// Multiplexed RPC connection.
pub struct RpcConnection {
    sink: tokio::sync::Mutex<FrameSink>,
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    options: ClientOptions,
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("open", &self.is_open())
            .field("pending", &self.pending_len())
            .field("options", &self.options)
            .finish()
    }
}

impl RpcConnection {
    /// Connects to a WebSocket RPC endpoint such as `ws://127.0.0.1:8000/rpc`
    /// and starts the receive loop.
    pub async fn open(url: &str, options: ClientOptions) -> Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|err| DriverError::Transport(format!("failed to connect to {url}: {err}")))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(url, "rpc connection opened");

        Ok(Self::from_stream(stream, options))
    }

    /// Wraps an already connected WebSocket stream.
    ///
    /// Must be called from within a Tokio runtime; the receive loop is
    /// spawned onto it.
    pub fn from_stream<S>(stream: S, options: ClientOptions) -> Self
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + 'static,
    {
        let (sink, frames) = stream.split();
        let shared = Arc::new(Shared {
            pending: PendingTable::default(),
            open: AtomicBool::new(true),
            log_rpc: AtomicBool::new(options.log_rpc),
        });

        let receiver = tokio::spawn(receive_loop(frames, shared.clone()));

        Self {
            sink: tokio::sync::Mutex::new(Box::pin(sink)),
            shared,
            receiver: Mutex::new(Some(receiver)),
            options,
        }
    }

    /// Sends a request and waits for its correlated reply envelope.
    ///
    /// A server-reported error is returned inside the envelope, not as `Err`.
    pub async fn send(&self, request: RpcRequest) -> Result<RpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.roundtrip(request, Completion::Envelope(tx), rx, std::future::pending())
            .await
    }

    /// Sends a request whose reply is decoded by `decode` on the receive loop.
    pub async fn send_decoded<T, F>(&self, request: RpcRequest, decode: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcResponse) -> Result<T> + Send + 'static,
    {
        let (completion, rx) = Completion::decode(decode);
        self.roundtrip(request, completion, rx, std::future::pending())
            .await
    }

    /// Like [`Self::send`], but stops waiting with [`DriverError::Cancelled`]
    /// once `cancel` resolves.
    ///
    /// Cancellation does not retract a frame already written; a late reply is
    /// dropped. Other pending operations are not affected.
    pub async fn send_with_cancel<C>(&self, request: RpcRequest, cancel: C) -> Result<RpcResponse>
    where
        C: Future<Output = ()>,
    {
        let (tx, rx) = oneshot::channel();
        self.roundtrip(request, Completion::Envelope(tx), rx, cancel)
            .await
    }

    async fn roundtrip<T, C>(
        &self,
        request: RpcRequest,
        completion: Completion,
        reply: oneshot::Receiver<Result<T>>,
        cancel: C,
    ) -> Result<T>
    where
        C: Future<Output = ()>,
    {
        self.ensure_open()?;

        let id = request.id.clone();
        let frame = serde_json::to_string(&request)
            .map_err(|err| DriverError::Protocol(format!("cannot encode request {id}: {err}")))?;

        // Registered before writing, so a fast reply always finds its entry.
        self.shared
            .pending
            .insert(id.clone(), PendingOperation::new(request.method.as_str(), completion))?;

        if let Err(err) = self.ensure_open() {
            self.shared.pending.remove(&id);
            return Err(err);
        }

        #[cfg(feature = "tracing")]
        if self.shared.log_rpc.load(Ordering::Relaxed) {
            tracing::trace!(%frame, "rpc frame sent");
        }

        if let Err(err) = self.write(frame).await {
            self.shared.pending.remove(&id);
            return Err(err);
        }

        let timeout = Duration::from_millis(self.options.timeout_ms);
        tokio::select! {
            outcome = tokio::time::timeout(timeout, reply) => match outcome {
                Ok(Ok(result)) => result,
                // Slot dropped without being fulfilled.
                Ok(Err(_)) => Err(DriverError::Cancelled),
                Err(_) => {
                    self.shared.pending.abandon(&id);
                    Err(DriverError::Timeout {
                        id: id.to_string(),
                        timeout_ms: self.options.timeout_ms,
                    })
                }
            },
            () = cancel => {
                self.shared.pending.abandon(&id);
                Err(DriverError::Cancelled)
            }
        }
    }

    async fn write(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame)).await.map_err(|err| {
            self.shared.open.store(false, Ordering::SeqCst);
            DriverError::Transport(format!("write failed: {err}"))
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::Transport("connection is closed".to_owned()))
        }
    }

    /// Stops the receive loop, closes the socket and cancels every pending
    /// operation. Calling it again is a no-op.
    pub async fn close(&self) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            return;
        };

        self.shared.open.store(false, Ordering::SeqCst);
        receiver.abort();

        if let Err(_err) = self.sink.lock().await.close().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "closing rpc socket failed");
        }

        let _cancelled = self.shared.pending.drain(|| DriverError::Cancelled);

        #[cfg(feature = "tracing")]
        tracing::debug!(cancelled = _cancelled, "rpc connection closed");
    }

    /// Non-blocking liveness check.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Toggles request/reply frame logging at runtime.
    pub fn set_logging(&self, enabled: bool) {
        self.shared.log_rpc.store(enabled, Ordering::Relaxed);
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        let receiver = self
            .receiver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            receiver.abort();
            self.shared.pending.drain(|| DriverError::Cancelled);
        }
    }
}

async fn receive_loop<R>(mut frames: R, shared: Arc<Shared>)
where
    R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    let reason = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => break format!("read failed: {err}"),
            None => break "connection closed by peer".to_owned(),
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "dropping non utf-8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break "connection closed by peer".to_owned(),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        shared.dispatch(text);
    };

    shared.open.store(false, Ordering::SeqCst);
    let _failed = shared
        .pending
        .drain(|| DriverError::Transport(reason.clone()));

    #[cfg(feature = "tracing")]
    tracing::debug!(%reason, failed = _failed, "rpc receive loop stopped");
}
