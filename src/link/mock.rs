//! In-memory serial link for tests
//!
//! [`MockLink`] is a cloneable handle onto shared rx/tx buffers. The
//! [`MockEndpoint`] it hands out is what a [`Transport`](super::Transport)
//! owns; dropping the endpoint counts as releasing the device.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::transport::SerialLink;

#[derive(Default)]
struct Shared {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
}

/// Test handle for inspecting and feeding a mock link
#[derive(Clone, Default)]
pub struct MockLink {
    shared: Arc<Mutex<Shared>>,
    releases: Arc<AtomicUsize>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the endpoint side to hand to a transport
    pub fn endpoint(&self) -> MockEndpoint {
        MockEndpoint {
            shared: Arc::clone(&self.shared),
            releases: Arc::clone(&self.releases),
        }
    }

    /// Queue inbound bytes as if the peer had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    /// Everything written so far
    pub fn tx(&self) -> Vec<u8> {
        self.shared.lock().unwrap().tx.clone()
    }

    /// Written bytes as text
    pub fn tx_string(&self) -> String {
        String::from_utf8_lossy(&self.tx()).into_owned()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.shared.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.lock().unwrap().fail_writes = fail;
    }

    /// How many times an endpoint has been released
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// The link side owned by a transport
pub struct MockEndpoint {
    shared: Arc<Mutex<Shared>>,
    releases: Arc<AtomicUsize>,
}

impl SerialLink for MockEndpoint {
    fn bytes_pending(&mut self) -> io::Result<usize> {
        let shared = self.shared.lock().unwrap();
        if shared.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
        }
        Ok(shared.rx.len())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
        }
        Ok(shared.rx.pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        shared.tx.extend_from_slice(bytes);
        Ok(())
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
