//! Bounded drop-oldest outbound queue, drained by one sender task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Item read by the sender task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Text(Arc<str>),
    /// Stop after everything queued ahead of it has been sent.
    Close,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Outbound>,
    closed: bool,
}

/// Per-connection outbound queue.
///
/// Pushes never wait: when the queue is full the oldest message is evicted
/// to make room. Eviction and insertion happen under the queue's own lock,
/// independent of the registry lock.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a message. Returns `false` once the queue is closed.
    pub(crate) fn push(&self, text: Arc<str>) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.items.len() >= self.capacity {
                state.items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.items.push_back(Outbound::Text(text));
        }
        self.notify.notify_one();
        true
    }

    /// Queue the close sentinel, evicting the oldest message if full.
    ///
    /// Returns `false` if the queue was already closed.
    pub(crate) fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            if state.items.len() >= self.capacity {
                state.items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.items.push_back(Outbound::Close);
        }
        self.notify.notify_one();
        true
    }

    /// Refuse further pushes and discard anything still queued.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.items.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait for the next item.
    pub(crate) async fn pop(&self) -> Outbound {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.state.lock().items.pop_front() {
                return item;
            }
            notified.await;
        }
    }
}
