//! Ordered hand-off of decoded events from the I/O side to the consumer.
//!
//! The queue is FIFO and single-consumer. Events are only ever removed from
//! the front (delivery) or, when a capacity is configured and the queue is
//! full, by evicting the oldest `ConfigUpdate`/`UserStatus` event. Either way
//! the relative order of the remaining events is untouched, so events of one
//! channel reach the consumer in the order they were decoded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use crate::models::Event;

#[derive(Debug)]
struct Shared {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: Option<usize>,
    closed: AtomicBool,
    receiver_alive: AtomicBool,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a connected dispatcher/stream pair.
///
/// `capacity: None` gives the unbounded reference behaviour.
pub fn event_channel(capacity: Option<usize>) -> (EventDispatcher, EventStream) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        capacity,
        closed: AtomicBool::new(false),
        receiver_alive: AtomicBool::new(true),
        dispatched: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    (
        EventDispatcher {
            shared: shared.clone(),
        },
        EventStream { shared },
    )
}

/// Producer side, owned by the connection worker.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    /// Enqueue `event` without blocking.
    ///
    /// Returns `false` if the stream was closed or dropped and the event was
    /// discarded.
    pub fn dispatch(&self, event: Event) -> bool {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) || !shared.receiver_alive.load(Ordering::SeqCst) {
            return false;
        }

        {
            let mut queue = shared.queue();
            if let Some(capacity) = shared.capacity {
                if queue.len() >= capacity {
                    if let Some(pos) = queue.iter().position(|e| e.kind.is_evictable()) {
                        if let Some(evicted) = queue.remove(pos) {
                            debug!("Event queue full, dropping {:?} event", evicted.kind);
                            shared.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            queue.push_back(event);
        }

        shared.dispatched.fetch_add(1, Ordering::Relaxed);
        shared.notify.notify_one();
        true
    }

    /// Mark the stream finished. Queued events remain receivable.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Total events accepted into the queue.
    pub fn dispatched_count(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Events evicted under backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the event queue.
#[derive(Debug)]
pub struct EventStream {
    shared: Arc<Shared>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the dispatcher is closed
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                // A dispatch may have raced with close
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.shared.queue().pop_front()
    }

    /// Blocking variant of [`recv`](Self::recv) for consumers outside an async context.
    ///
    /// Must not be called from within a tokio runtime thread.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        futures::executor::block_on(self.recv())
    }

    pub fn len(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::SeqCst);
        self.shared.queue().clear();
    }
}
