//! One resolution handle, three calling styles
//!
//! `Pending<T>` is the only notification mechanism in the crate: the
//! dispatcher resolves a `oneshot` exactly once, and the three public entry
//! points (`resolve`, `wait`, `on_complete`) are thin adapters over that
//! single channel. Dropping a `Pending` cancels the wait but not the command:
//! the dispatcher still drains the wire and simply finds nobody listening.

use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::codec::Value;
use crate::error::BusError;

pub(crate) type Resolution = Result<Value, BusError>;

/// A command that has been accepted onto the bus queue.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Resolution>,
    convert: fn(Value) -> Result<T, BusError>,
    runtime: Handle,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Resolution>,
        convert: fn(Value) -> Result<T, BusError>,
        runtime: Handle,
    ) -> Self {
        Pending {
            rx,
            convert,
            runtime,
        }
    }

    /// Retype the eventual value without touching the wire protocol.
    pub(crate) fn with_type<U: Send + 'static>(
        self,
        convert: fn(Value) -> Result<U, BusError>,
    ) -> Pending<U> {
        Pending {
            rx: self.rx,
            convert,
            runtime: self.runtime,
        }
    }

    /// Suspend/resume style: await the resolution.
    pub async fn resolve(self) -> Result<T, BusError> {
        let convert = self.convert;
        match self.rx.await {
            Ok(resolution) => resolution.and_then(convert),
            // Dispatcher task went away before resolving us.
            Err(_) => Err(BusError::Closed),
        }
    }

    /// Blocking style: park the calling thread until the resolution lands.
    ///
    /// Must not be called from inside the async runtime; use `resolve` there,
    /// or hand this off to a dedicated thread.
    pub fn wait(self) -> Result<T, BusError> {
        let convert = self.convert;
        match self.rx.blocking_recv() {
            Ok(resolution) => resolution.and_then(convert),
            Err(_) => Err(BusError::Closed),
        }
    }

    /// Callback style: returns immediately, invokes `callback` with the
    /// resolution on a spawned task. The callback runs off the dispatcher's
    /// completion path, so it may freely submit new commands.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<T, BusError>) + Send + 'static,
    {
        let convert = self.convert;
        let rx = self.rx;
        self.runtime.spawn(async move {
            let resolution = match rx.await {
                Ok(resolution) => resolution.and_then(convert),
                Err(_) => Err(BusError::Closed),
            };
            callback(resolution);
        });
    }
}
