//! Pending notification queue
//!
//! Holds notifications that could not be delivered while offline. Messages
//! leave the queue strictly in FIFO order and only after they were sent; a
//! flush stops at the first message that still cannot be delivered.

use crate::telegram_client::NotificationChannel;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMessage {
    id: u64,
    pub text: String,
    pub queued_at: DateTime<Local>,
}

pub struct PendingQueue {
    messages: Mutex<VecDeque<PendingMessage>>,
    next_id: AtomicU64,
    flushing: AtomicBool,
    capacity: usize,
}

/// Clears the flushing flag however the flush ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            flushing: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    // the lock is only held for a single append/peek/remove
    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Texts currently queued, oldest first
    pub fn texts(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.text.clone()).collect()
    }

    pub fn enqueue(&self, text: &str) {
        let message = PendingMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            text: text.to_string(),
            queued_at: Local::now(),
        };

        let mut messages = self.lock();

        if messages.len() >= self.capacity {
            if let Some(dropped) = messages.pop_front() {
                warn!(
                    "pending queue full ({}), dropping message queued at {}",
                    self.capacity,
                    dropped.queued_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        messages.push_back(message);

        info!(
            "message queued (pending: {}): {}",
            messages.len(),
            text.chars().take(50).collect::<String>()
        );
    }

    /// Send queued messages in FIFO order until one fails
    ///
    /// # Returns
    /// Number of messages still queued
    pub async fn flush<C>(&self, channel: &C) -> usize
    where
        C: NotificationChannel,
    {
        if self.flushing.swap(true, Ordering::AcqRel) {
            debug!("flush already in progress");
            return self.len();
        }

        let _guard = FlushGuard(&self.flushing);

        let pending = self.len();

        if pending == 0 {
            return 0;
        }

        info!("flushing {pending} pending message(s)");

        while let Some(message) = self.front() {
            if !channel.send(&message.text).await {
                warn!("failed to send pending message, keeping it queued");
                break;
            }

            self.remove(message.id);
            info!("pending message sent ({} remaining)", self.len());
        }

        self.len()
    }

    fn front(&self) -> Option<PendingMessage> {
        self.lock().front().cloned()
    }

    fn remove(&self, id: u64) {
        let mut messages = self.lock();

        if let Some(index) = messages.iter().position(|m| m.id == id) {
            messages.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram_client::MockNotificationChannel;
    use std::sync::Arc;

    /// Channel mock failing every text listed in `failing`, recording all attempts
    fn recording_channel(
        failing: &'static [&'static str],
    ) -> (MockNotificationChannel, Arc<Mutex<Vec<String>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let recorded = attempts.clone();

        let mut channel = MockNotificationChannel::new();
        channel.expect_send().returning(move |text: &str| {
            recorded.lock().unwrap().push(text.to_string());
            let delivered = !failing.iter().any(|f| *f == text);
            Box::pin(async move { delivered })
        });

        (channel, attempts)
    }

    #[tokio::test]
    async fn flushing_empty_queue_is_noop() {
        let mut channel = MockNotificationChannel::new();
        channel.expect_send().never();

        let queue = PendingQueue::new(10);

        assert_eq!(queue.flush(&channel).await, 0);
        assert_eq!(queue.flush(&channel).await, 0);
    }

    #[tokio::test]
    async fn flush_delivers_in_order() {
        let (channel, attempts) = recording_channel(&[]);
        let queue = PendingQueue::new(10);
        queue.enqueue("A");
        queue.enqueue("B");
        queue.enqueue("C");

        assert_eq!(queue.flush(&channel).await, 0);
        assert!(queue.is_empty());
        assert_eq!(*attempts.lock().unwrap(), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn flush_stops_at_first_failure() {
        let (channel, attempts) = recording_channel(&["B"]);
        let queue = PendingQueue::new(10);
        queue.enqueue("A");
        queue.enqueue("B");
        queue.enqueue("C");

        assert_eq!(queue.flush(&channel).await, 2);
        assert_eq!(queue.texts(), ["B", "C"]);
        assert_eq!(*attempts.lock().unwrap(), ["A", "B"]);
    }

    #[tokio::test]
    async fn later_flush_resumes_with_oldest() {
        let queue = PendingQueue::new(10);
        queue.enqueue("A");
        queue.enqueue("B");

        let (offline, _) = recording_channel(&["A", "B"]);
        assert_eq!(queue.flush(&offline).await, 2);

        let (online, attempts) = recording_channel(&[]);
        assert_eq!(queue.flush(&online).await, 0);
        assert_eq!(*attempts.lock().unwrap(), ["A", "B"]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = PendingQueue::new(2);
        queue.enqueue("A");
        queue.enqueue("B");
        queue.enqueue("C");

        assert_eq!(queue.texts(), ["B", "C"]);
    }

    #[test]
    fn zero_capacity_keeps_latest_message() {
        let queue = PendingQueue::new(0);
        queue.enqueue("A");
        queue.enqueue("B");

        assert_eq!(queue.texts(), ["B"]);
    }

    #[tokio::test]
    async fn flush_is_not_reentrant() {
        let queue = PendingQueue::new(10);
        queue.enqueue("A");
        queue.flushing.store(true, Ordering::SeqCst);

        let mut channel = MockNotificationChannel::new();
        channel.expect_send().never();

        assert_eq!(queue.flush(&channel).await, 1);
    }
}
