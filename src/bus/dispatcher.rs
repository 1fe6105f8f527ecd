//! Command dispatcher: the single owner of the bus
//!
//! One spawned task owns the transport and advances a FIFO of submitted
//! commands, strictly one at a time. Every calling style funnels into
//! `submit`, which never blocks: it enqueues onto a bounded channel and hands
//! back a `Pending` resolved exactly once by the dispatch task. Because only
//! that task touches the transport, no submitter needs its own locking and
//! the wire can never see interleaved writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

use super::pending::{Pending, Resolution};
use crate::codec::Value;
use crate::error::{BusError, ProtocolError};
use crate::transport::Transport;

/// Bus-wide defaults; every value can be overridden per command through
/// `ResponseSpec`.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Window for one response attempt.
    pub response_timeout: Duration,
    /// Re-sends after a timeout or decode failure, before giving up.
    pub max_retries: u32,
    /// Commands that may sit in the queue before `submit` rejects.
    pub queue_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            max_retries: 2,
            queue_depth: 1024,
        }
    }
}

/// How the dispatcher recognises and interprets the response to one command.
///
/// This is the codec knowledge a command carries across the dispatch
/// boundary: a completeness check and a decode, nothing about brands.
pub trait ResponseDecoder: Send + Sync {
    /// Has a whole frame accumulated?
    fn is_complete(&self, buf: &[u8]) -> bool;

    /// Decode the completed frame.
    fn decode(&self, buf: &[u8]) -> Result<Value, ProtocolError>;
}

/// Per-command response policy. Absent entirely for fire-and-forget writes.
pub struct ResponseSpec {
    pub decoder: Box<dyn ResponseDecoder>,
    pub timeout: Duration,
    pub max_retries: u32,
}

struct DispatchRequest {
    bytes: Bytes,
    response: Option<ResponseSpec>,
    done: oneshot::Sender<Resolution>,
}

/// Handle to the dispatch task. Cheap to share behind an `Arc`; facades for
/// different brands may submit to the same dispatcher concurrently.
pub struct CommandDispatcher {
    tx: mpsc::Sender<DispatchRequest>,
    closed: Arc<AtomicBool>,
    close_tx: watch::Sender<bool>,
    runtime: Handle,
    config: BusConfig,
}

impl CommandDispatcher {
    /// Take exclusive ownership of a transport and start dispatching.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T: Transport>(transport: T, config: BusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let (close_tx, close_rx) = watch::channel(false);
        let closed = Arc::new(AtomicBool::new(false));
        let runtime = Handle::current();

        let loop_closed = closed.clone();
        runtime.spawn(dispatch_loop(transport, rx, close_rx, loop_closed));

        Self {
            tx,
            closed,
            close_tx,
            runtime,
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Build a `ResponseSpec` with the bus-wide timeout and retry defaults.
    pub fn response_spec(&self, decoder: Box<dyn ResponseDecoder>) -> ResponseSpec {
        ResponseSpec {
            decoder,
            timeout: self.config.response_timeout,
            max_retries: self.config.max_retries,
        }
    }

    /// Enqueue one encoded command. Returns immediately; the `Pending`
    /// resolves when the command reaches its terminal outcome.
    ///
    /// Commands are dispatched in submission order. A command without a
    /// `ResponseSpec` resolves `Value::None` right after its bytes are
    /// written.
    pub fn submit(
        &self,
        bytes: Bytes,
        response: Option<ResponseSpec>,
    ) -> Result<Pending<Value>, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let (done, rx) = oneshot::channel();
        let request = DispatchRequest {
            bytes,
            response,
            done,
        };
        self.tx.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => BusError::QueueFull,
            TrySendError::Closed(_) => BusError::Closed,
        })?;
        Ok(Pending::new(rx, Ok, self.runtime.clone()))
    }

    /// Close the bus. Terminal and idempotent: the in-flight command and
    /// every queued command resolve with `Closed`, later submissions fail
    /// fast, and the transport is released.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.close_tx.send(true);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A failure that takes the whole bus down, not just one command.
enum Fatal {
    Io(String),
    Closed,
}

enum AttemptError {
    Timeout,
    Protocol(ProtocolError),
    Fatal(Fatal),
}

async fn dispatch_loop<T: Transport>(
    mut transport: T,
    mut rx: mpsc::Receiver<DispatchRequest>,
    mut close_rx: watch::Receiver<bool>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = close_rx.changed() => break,
            msg = rx.recv() => match msg {
                Some(request) => request,
                // Every handle dropped; nothing can be queued anymore.
                None => break,
            },
        };

        if let Err(fatal) = run_command(&mut transport, request, &mut close_rx).await {
            match fatal {
                Fatal::Io(message) => {
                    error!(%message, "transport failure, poisoning bus");
                    closed.store(true, Ordering::SeqCst);
                    drain(&mut rx, &BusError::Transport(message));
                    let _ = transport.shutdown().await;
                    return;
                }
                Fatal::Closed => break,
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    drain(&mut rx, &BusError::Closed);
    let _ = transport.shutdown().await;
    debug!("dispatcher stopped");
}

/// Fail everything still sitting in the queue.
fn drain(rx: &mut mpsc::Receiver<DispatchRequest>, err: &BusError) {
    rx.close();
    while let Ok(request) = rx.try_recv() {
        let _ = request.done.send(Err(err.clone()));
    }
}

/// Drive one command to its terminal resolution. `Err` means the bus itself
/// is done for; per-command failures are delivered through `done` and return
/// `Ok`.
async fn run_command<T: Transport>(
    transport: &mut T,
    request: DispatchRequest,
    close_rx: &mut watch::Receiver<bool>,
) -> Result<(), Fatal> {
    let DispatchRequest {
        bytes,
        response,
        done,
    } = request;

    let Some(spec) = response else {
        if let Err(err) = transport.write_all(&bytes).await {
            let _ = done.send(Err(BusError::transport(&err)));
            return Err(Fatal::Io(err.to_string()));
        }
        debug!(len = bytes.len(), "fire-and-forget command written");
        let _ = done.send(Ok(Value::None));
        return Ok(());
    };

    let mut attempt: u32 = 0;
    let outcome = loop {
        attempt += 1;
        if let Err(err) = transport.write_all(&bytes).await {
            let _ = done.send(Err(BusError::transport(&err)));
            return Err(Fatal::Io(err.to_string()));
        }
        debug!(len = bytes.len(), attempt, "command written, awaiting response");

        match read_response(transport, spec.decoder.as_ref(), spec.timeout, close_rx).await {
            Ok(value) => break Ok(value),
            Err(AttemptError::Fatal(fatal)) => {
                let _ = done.send(Err(match &fatal {
                    Fatal::Io(message) => BusError::Transport(message.clone()),
                    Fatal::Closed => BusError::Closed,
                }));
                return Err(fatal);
            }
            Err(AttemptError::Timeout) => {
                if attempt <= spec.max_retries {
                    warn!(attempt, "response window elapsed, re-sending");
                    continue;
                }
                break Err(BusError::Timeout {
                    attempts: attempt,
                    per_attempt: spec.timeout,
                });
            }
            Err(AttemptError::Protocol(err)) => {
                if attempt <= spec.max_retries {
                    warn!(attempt, error = %err, "bad response, re-sending");
                    continue;
                }
                break Err(BusError::Protocol(err));
            }
        }
    };

    // The submitter may have cancelled its wait; the send failing is fine.
    let _ = done.send(outcome);
    Ok(())
}

/// Accumulate bytes until the decoder calls the frame complete, the window
/// elapses, or the bus is closed out from under us.
async fn read_response<T: Transport>(
    transport: &mut T,
    decoder: &dyn ResponseDecoder,
    window: Duration,
    close_rx: &mut watch::Receiver<bool>,
) -> Result<Value, AttemptError> {
    let mut buf = BytesMut::with_capacity(64);
    let mut chunk = [0u8; 256];
    let deadline = Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AttemptError::Timeout);
        }

        tokio::select! {
            biased;
            _ = close_rx.changed() => return Err(AttemptError::Fatal(Fatal::Closed)),
            read = timeout(remaining, transport.read_some(&mut chunk)) => match read {
                Err(_) => return Err(AttemptError::Timeout),
                Ok(Err(err)) => {
                    return Err(AttemptError::Fatal(Fatal::Io(err.to_string())));
                }
                Ok(Ok(0)) => {
                    return Err(AttemptError::Fatal(Fatal::Io(
                        "transport stream ended".into(),
                    )));
                }
                Ok(Ok(n)) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if decoder.is_complete(&buf) {
                        return decoder.decode(&buf).map_err(AttemptError::Protocol);
                    }
                }
            },
        }
    }
}
