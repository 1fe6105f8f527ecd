//! Scripted in-memory transport for tests
//!
//! Each write consumes the next `Reply` from the script: a whole frame, a
//! fragmented frame, or silence. The test side keeps a `MockHandle` to
//! inspect writes and to break the pipe mid-flight.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::Transport;

/// What the fake bus does in answer to one write.
pub enum Reply {
    /// Deliver one complete frame.
    Frame(Vec<u8>),
    /// Deliver a frame split across several reads.
    Chunks(Vec<Vec<u8>>),
    /// Say nothing.
    Silence,
}

#[derive(Default)]
struct MockState {
    writes: Vec<Vec<u8>>,
    script: VecDeque<Reply>,
    inbound: VecDeque<Vec<u8>>,
    broken: bool,
}

/// Test-side view of the mock bus.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl MockHandle {
    pub fn new() -> Self {
        MockHandle {
            state: Arc::new(Mutex::new(MockState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue the reply to the next unanswered write.
    pub fn push_script(&self, reply: Reply) {
        self.state.lock().unwrap().script.push_back(reply);
    }

    /// Every write the dispatcher has made, in order, one entry per call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Make every subsequent read and write fail with a broken pipe.
    pub fn break_pipe(&self) {
        self.state.lock().unwrap().broken = true;
        self.notify.notify_one();
    }
}

/// The dispatcher-side half handed to `CommandDispatcher::new`.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl MockTransport {
    pub fn new(handle: MockHandle) -> Self {
        MockTransport {
            state: handle.state,
            notify: handle.notify,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken"));
        }
        state.writes.push(bytes.to_vec());
        match state.script.pop_front() {
            Some(Reply::Frame(frame)) => state.inbound.push_back(frame),
            Some(Reply::Chunks(chunks)) => state.inbound.extend(chunks),
            Some(Reply::Silence) | None => {}
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.broken {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken"));
                }
                if let Some(chunk) = state.inbound.pop_front() {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        state.inbound.push_front(chunk[n..].to_vec());
                    }
                    return Ok(n);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}
