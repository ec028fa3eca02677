//! Mock transport for testing.
//!
//! [`MockConnection`] behaves like a socket rather than a buffer: a
//! read on an open, empty connection blocks until data is injected or
//! the connection is shut down, at which point it returns EOF. That
//! makes the client's EOF-triggers-disconnect path testable without a
//! network.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{Connection, Dialer};
use crate::error::{Error, Result};

/// Mock duplex connection for unit testing.
#[derive(Clone)]
pub struct MockConnection {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    readable: Condvar,
}

#[derive(Default)]
struct State {
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
    closed: bool,
}

impl MockConnection {
    pub fn new() -> Self {
        MockConnection {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                readable: Condvar::new(),
            }),
        }
    }

    /// Inject data for the client to read.
    pub fn inject_read(&self, data: &[u8]) {
        let mut state = self.inner.state.lock();
        state.read_buf.extend(data);
        self.inner.readable.notify_all();
    }

    /// Everything the client has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.state.lock().write_buf.clone()
    }

    /// Discard captured writes.
    pub fn clear_written(&self) {
        self.inner.state.lock().write_buf.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.inner.state.lock();

        while state.read_buf.is_empty() && !state.closed {
            self.inner.readable.wait(&mut state);
        }

        if state.read_buf.is_empty() {
            return Ok(0); // closed: EOF
        }

        let n = state.read_buf.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockConnection {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection closed",
            ));
        }
        state.write_buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn try_clone(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.clone()))
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.inner.readable.notify_all();
        Ok(())
    }
}

/// Single-shot [`Dialer`] handing out a prepared connection or error.
pub struct MockDialer {
    outcome: Mutex<Option<Result<Box<dyn Connection>>>>,
}

impl MockDialer {
    /// Dialer that yields `conn` on the first `dial`.
    pub fn returning(conn: MockConnection) -> Self {
        MockDialer {
            outcome: Mutex::new(Some(Ok(Box::new(conn)))),
        }
    }

    /// Dialer that fails with an I/O error carrying `message`.
    pub fn failing(message: &str) -> Self {
        MockDialer {
            outcome: Mutex::new(Some(Err(Error::Io(std::io::Error::other(
                message.to_string(),
            ))))),
        }
    }
}

impl Dialer for MockDialer {
    fn dial(&self, _network: &str, _address: &str) -> Result<Box<dyn Connection>> {
        match self.outcome.lock().take() {
            Some(outcome) => outcome,
            None => Err(Error::Io(std::io::Error::other("no connection configured"))),
        }
    }
}
