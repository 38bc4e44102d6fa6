use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::Notify;

/// What happened to an item handed to [`DropOldestQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; the oldest pending item was discarded to make room.
    ReplacedOldest,
    /// The queue stayed full even after one eviction; the new item was discarded.
    Dropped,
    /// The consumer has gone away.
    Closed,
}

/// Bounded single-consumer queue that never blocks the producer.
///
/// When full, the oldest pending item is evicted so the newest one always
/// gets in; resident items never exceed `capacity`.
pub struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        let outcome = {
            let mut items = self.lock();
            if items.len() < self.capacity {
                items.push_back(item);
                PushOutcome::Queued
            } else {
                items.pop_front();
                if items.len() < self.capacity {
                    items.push_back(item);
                    PushOutcome::ReplacedOldest
                } else {
                    PushOutcome::Dropped
                }
            }
        };
        if outcome != PushOutcome::Dropped {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next item. Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.lock();
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Refuse further pushes and wake the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
