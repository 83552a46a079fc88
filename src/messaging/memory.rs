use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

use super::{Delivery, EventProducer, MessageStream, ProducerError, StreamError};

// ============================================================================
// In-memory stream and producer doubles
// ============================================================================

/// Append-only log with per-call partition choice. Rewinding behaves like a
/// broker seek: the rewound delivery and every later delivery of the same
/// partition that was already handed out are handed out again, in order.
#[derive(Default)]
pub struct InMemoryStream {
    state: Mutex<StreamState>,
    commits: Mutex<Vec<Delivery>>,
    rewinds: Mutex<Vec<Delivery>>,
    available: Notify,
}

#[derive(Default)]
struct StreamState {
    log: Vec<Delivery>,
    cursor: usize,
    replay: VecDeque<Delivery>,
    next_offsets: HashMap<i32, i64>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to `partition` and return its delivery
    pub fn push(&self, partition: i32, payload: impl Into<Vec<u8>>) -> Delivery {
        let delivery = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let next = state.next_offsets.entry(partition).or_insert(0);
            let offset = *next;
            *next += 1;

            let delivery = Delivery {
                topic: "sales".to_string(),
                partition,
                offset,
                key: None,
                payload: payload.into(),
            };
            state.log.push(delivery.clone());
            delivery
        };

        self.available.notify_one();
        delivery
    }

    pub fn commits(&self) -> Vec<Delivery> {
        self.commits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn rewinds(&self) -> Vec<Delivery> {
        self.rewinds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deliveries not yet handed out (including queued replays)
    pub fn undelivered(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.len() - state.cursor + state.replay.len()
    }

    fn poll(&self) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delivery) = state.replay.pop_front() {
            return Some(delivery);
        }
        let delivery = state.log.get(state.cursor).cloned()?;
        state.cursor += 1;
        Some(delivery)
    }
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn next_delivery(&self) -> Result<Delivery, StreamError> {
        loop {
            let notified = self.available.notified();
            if let Some(delivery) = self.poll() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    fn commit(&self, delivery: &Delivery) -> Result<(), StreamError> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delivery.clone());
        Ok(())
    }

    async fn rewind(&self, delivery: &Delivery) -> Result<(), StreamError> {
        self.rewinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delivery.clone());

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let same_tail = |d: &Delivery| d.partition == delivery.partition && d.offset >= delivery.offset;

            state.replay.retain(|d| !same_tail(d));
            let handed_out: Vec<Delivery> = state.log[..state.cursor]
                .iter()
                .filter(|d| same_tail(d))
                .cloned()
                .collect();
            for d in handed_out.into_iter().rev() {
                state.replay.push_front(d);
            }
        }

        self.available.notify_one();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Producer that records every send; can be switched to fail
#[derive(Default)]
pub struct RecordingProducer {
    sent: Mutex<Vec<SentRecord>>,
    failing: AtomicBool,
    failures_left: AtomicU32,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` sends, then recover
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl EventProducer for RecordingProducer {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), ProducerError> {
        let scheduled_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scheduled_failure || self.failing.load(Ordering::SeqCst) {
            return Err(ProducerError::SendFailed {
                topic: topic.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentRecord {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
