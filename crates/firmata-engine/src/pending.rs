//! Pending Request Correlation
//!
//! Turns the unsolicited Firmata byte stream into awaitable request/response
//! calls. Each waiter is keyed by the leading bytes of the reply it expects;
//! the oldest waiter for a key is served first. A waiter is resolved exactly
//! once, by the matching reply or by its timer, whichever gets the table lock
//! first.

use firmata_protocol::FirmataError;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Completion = oneshot::Sender<Result<Vec<u8>, FirmataError>>;

/// Pack a 1-4 byte reply prefix big-endian into a correlation key
pub fn compute_key(prefix: &[u8]) -> Result<u32, FirmataError> {
    if prefix.is_empty() || prefix.len() > 4 {
        return Err(FirmataError::InvalidArgument(format!(
            "correlation prefix must be 1-4 bytes, got {}",
            prefix.len()
        )));
    }
    Ok(prefix
        .iter()
        .fold(0u32, |key, &byte| (key << 8) | u32::from(byte)))
}

/// Whole milliseconds in `timeout`, saturating at `u64::MAX`
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

struct Entry {
    id: u64,
    completion: Completion,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<u32, VecDeque<Entry>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, VecDeque<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one entry out of the table by id
    fn remove(&self, key: u32, id: u64) -> Option<Entry> {
        let mut entries = self.lock();
        let queue = entries.get_mut(&key)?;
        let position = queue.iter().position(|entry| entry.id == id)?;
        let entry = queue.remove(position);
        if queue.is_empty() {
            entries.remove(&key);
        }
        entry
    }

    fn expire(&self, key: u32, id: u64, timeout_ms: u64) {
        if let Some(entry) = self.remove(key, id) {
            debug!("Request {:08X} timed out after {}ms", key, timeout_ms);
            let _ = entry.completion.send(Err(FirmataError::Timeout(timeout_ms)));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values().flatten() {
            entry.timer.abort();
        }
    }
}

/// Table of callers waiting for keyed replies
///
/// Cloning yields another handle to the same table. Registration needs a
/// running Tokio runtime for the expiry timers.
#[derive(Clone, Default)]
pub struct PendingRequestTable {
    inner: Arc<Inner>,
}

impl PendingRequestTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key` that fails after `timeout`
    ///
    /// A zero timeout resolves immediately to [`FirmataError::Timeout`]
    /// without entering the table.
    pub fn register(&self, key: u32, timeout: Duration) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let timeout_ms = timeout_millis(timeout);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        if timeout.is_zero() {
            let _ = tx.send(Err(FirmataError::Timeout(0)));
            return PendingResponse { key, id, rx };
        }

        // Held across spawn so the timer cannot look for the entry before it exists
        let mut entries = self.inner.lock();
        let table: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = table.upgrade() {
                inner.expire(key, id, timeout_ms);
            }
        });
        entries.entry(key).or_default().push_back(Entry {
            id,
            completion: tx,
            timer,
        });
        trace!("Registered request {:08X} ({}ms)", key, timeout_ms);

        PendingResponse { key, id, rx }
    }

    /// Hand `data` to the oldest live waiter for `key`
    ///
    /// Waiters whose caller has gone away are discarded on the way. Returns
    /// `false` when nobody was waiting; the data is dropped.
    pub fn complete(&self, key: u32, data: Vec<u8>) -> bool {
        let entry = {
            let mut entries = self.inner.lock();
            let Some(queue) = entries.get_mut(&key) else {
                trace!("No pending request for {:08X}, dropping reply", key);
                return false;
            };
            let mut live = None;
            while let Some(entry) = queue.pop_front() {
                if entry.completion.is_closed() {
                    debug!("Discarding abandoned request {:08X}", key);
                    entry.timer.abort();
                    continue;
                }
                live = Some(entry);
                break;
            }
            if queue.is_empty() {
                entries.remove(&key);
            }
            live
        };

        match entry {
            Some(entry) => {
                entry.timer.abort();
                if entry.completion.send(Ok(data)).is_err() {
                    debug!("Caller for {:08X} stopped waiting", key);
                }
                true
            }
            None => {
                trace!("No live request for {:08X}, dropping reply", key);
                false
            }
        }
    }

    /// Withdraw a waiter that will never see its reply
    ///
    /// Used when the request could not be written. Returns `false` if the
    /// waiter was already resolved.
    pub fn cancel(&self, response: &PendingResponse) -> bool {
        match self.inner.remove(response.key, response.id) {
            Some(entry) => {
                entry.timer.abort();
                trace!("Cancelled request {:08X}", response.key);
                true
            }
            None => false,
        }
    }

    /// Total number of waiters
    pub fn len(&self) -> usize {
        self.inner.lock().values().map(VecDeque::len).sum()
    }

    /// Check if nobody is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of waiters for one key
    pub fn pending_for(&self, key: u32) -> usize {
        self.inner.lock().get(&key).map_or(0, VecDeque::len)
    }
}

/// Future resolving to the reply bytes or a timeout
///
/// Resolves to [`FirmataError::Closed`] if the table is dropped first.
#[derive(Debug)]
pub struct PendingResponse {
    key: u32,
    id: u64,
    rx: oneshot::Receiver<Result<Vec<u8>, FirmataError>>,
}

impl PendingResponse {
    /// Correlation key this response waits on
    pub fn key(&self) -> u32 {
        self.key
    }
}

impl Future for PendingResponse {
    type Output = Result<Vec<u8>, FirmataError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(FirmataError::Closed)))
    }
}
