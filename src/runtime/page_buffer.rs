// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Bounded page queue shared by the polling tasks of one exchange and its consumer.
//!
//! Every page fetched from a remote producer passes through `put`, and the consumer
//! drains it with `take`. The buffer also tracks which sources are still open so that
//! `take` can tell an empty queue apart from end-of-stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::common::error::{ExchangeError, Result};
use crate::common::ids::ProducerId;
use crate::exec::page::Page;
use crate::pagewire_logging::debug;

const PUT_BLOCKED_LOG_EVERY: u64 = 1024;
const TAKE_WAIT_LOG_EVERY: u64 = 4096;

static PUT_BLOCKED_LOG_COUNT: AtomicU64 = AtomicU64::new(0);
static TAKE_WAIT_LOG_COUNT: AtomicU64 = AtomicU64::new(0);

fn should_log_put_blocked() -> bool {
    PUT_BLOCKED_LOG_COUNT.fetch_add(1, Ordering::Relaxed) % PUT_BLOCKED_LOG_EVERY == 0
}

fn should_log_take_wait() -> bool {
    TAKE_WAIT_LOG_COUNT.fetch_add(1, Ordering::Relaxed) % TAKE_WAIT_LOG_EVERY == 0
}

/// How a source failure reaches the consumer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The next `take` raises, even with pages still queued.
    #[default]
    FailFast,
    /// Queued pages are delivered first; the failure replaces end-of-stream.
    DrainFirst,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SourceState {
    Open,
    Finished,
    Failed,
}

impl SourceState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SourceState::Open)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageRecvStats {
    pub pages_received: u64,
    pub rows_received: u64,
    pub bytes_received: u64,
}

#[derive(Clone, Debug)]
pub struct PageBufferSnapshot {
    pub capacity: usize,
    pub queued_pages: usize,
    pub queued_bytes: usize,
    pub peak_queued_pages: usize,
    pub registered_sources: usize,
    pub finished_sources: usize,
    pub failed_sources: usize,
    pub failed: bool,
    pub canceled: bool,
    pub stats: PageRecvStats,
}

#[derive(Default)]
struct BufferState {
    pages: VecDeque<Page>,
    queued_bytes: usize,
    peak_queued_pages: usize,
    sources: HashMap<ProducerId, SourceState>,
    failure: Option<ExchangeError>,
    canceled: bool,
    stats: PageRecvStats,
}

impl BufferState {
    fn all_sources_terminal(&self) -> bool {
        self.sources.values().all(|s| s.is_terminal())
    }

    /// Error a producer gets instead of enqueuing, if any.
    fn reject_reason(&self, source: &ProducerId) -> Option<ExchangeError> {
        if self.canceled {
            return Some(ExchangeError::Canceled);
        }
        if let Some(failure) = self.failure.as_ref() {
            return Some(failure.clone());
        }
        match self.sources.get(source) {
            None => Some(ExchangeError::InvalidDescriptor(format!(
                "page from unregistered source {source}"
            ))),
            Some(state) if state.is_terminal() => Some(ExchangeError::InvalidDescriptor(format!(
                "page from terminated source {source}"
            ))),
            Some(_) => None,
        }
    }

    fn enqueue(&mut self, page: Page) {
        let bytes = page.byte_size();
        self.stats.pages_received = self.stats.pages_received.saturating_add(1);
        self.stats.rows_received = self
            .stats
            .rows_received
            .saturating_add(page.num_rows() as u64);
        self.stats.bytes_received = self.stats.bytes_received.saturating_add(bytes as u64);
        self.queued_bytes = self.queued_bytes.saturating_add(bytes);
        self.pages.push_back(page);
        self.peak_queued_pages = self.peak_queued_pages.max(self.pages.len());
    }

    fn dequeue(&mut self) -> Option<Page> {
        let page = self.pages.pop_front()?;
        self.queued_bytes = self.queued_bytes.saturating_sub(page.byte_size());
        Some(page)
    }

    fn discard_queued(&mut self) {
        self.pages.clear();
        self.queued_bytes = 0;
    }
}

pub struct PageBuffer {
    capacity: usize,
    policy: FailurePolicy,
    mu: Mutex<BufferState>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl PageBuffer {
    pub fn new(capacity: usize, policy: FailurePolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            mu: Mutex::new(BufferState::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn register_source(&self, source: ProducerId) -> Result<()> {
        let mut st = self.mu.lock().expect("page buffer lock");
        if st.sources.contains_key(&source) {
            return Err(ExchangeError::InvalidDescriptor(format!(
                "duplicate producer id {source}"
            )));
        }
        st.sources.insert(source, SourceState::Open);
        Ok(())
    }

    /// Enqueues a page, blocking while the buffer is full.
    pub fn put(&self, source: &ProducerId, page: Page) -> Result<()> {
        let mut st = self.mu.lock().expect("page buffer lock");
        let mut blocked_since: Option<Instant> = None;
        loop {
            if let Some(err) = st.reject_reason(source) {
                return Err(err);
            }
            if st.pages.len() < self.capacity {
                st.enqueue(page);
                self.not_empty.notify_one();
                if let Some(since) = blocked_since {
                    debug!(
                        "page buffer put UNBLOCKED: source={} blocked_ms={}",
                        source,
                        since.elapsed().as_millis()
                    );
                }
                return Ok(());
            }
            if blocked_since.is_none() {
                blocked_since = Some(Instant::now());
                if should_log_put_blocked() {
                    debug!(
                        "page buffer put BLOCKED: source={} queued={} capacity={}",
                        source,
                        st.pages.len(),
                        self.capacity
                    );
                }
            }
            st = self.not_full.wait(st).expect("page buffer condvar wait");
        }
    }

    /// Enqueues a page without blocking. A full buffer hands the page back as `Ok(Some(page))`.
    pub fn try_put(&self, source: &ProducerId, page: Page) -> Result<Option<Page>> {
        let mut st = self.mu.lock().expect("page buffer lock");
        if let Some(err) = st.reject_reason(source) {
            return Err(err);
        }
        if st.pages.len() >= self.capacity {
            return Ok(Some(page));
        }
        st.enqueue(page);
        self.not_empty.notify_one();
        Ok(None)
    }

    /// Dequeues the next page, blocking while the buffer is empty and some source is open.
    /// `Ok(None)` is end-of-stream.
    pub fn take(&self) -> Result<Option<Page>> {
        let mut st = self.mu.lock().expect("page buffer lock");
        loop {
            if st.canceled {
                return Err(ExchangeError::Canceled);
            }
            if self.policy == FailurePolicy::FailFast
                && let Some(failure) = st.failure.as_ref()
            {
                return Err(failure.clone());
            }
            if let Some(page) = st.dequeue() {
                self.not_full.notify_all();
                return Ok(Some(page));
            }
            if let Some(failure) = st.failure.as_ref() {
                return Err(failure.clone());
            }
            if st.all_sources_terminal() {
                return Ok(None);
            }
            if should_log_take_wait() {
                debug!(
                    "page buffer take WAITING: open_sources={} received_pages={}",
                    st.sources.values().filter(|s| !s.is_terminal()).count(),
                    st.stats.pages_received
                );
            }
            st = self.not_empty.wait(st).expect("page buffer condvar wait");
        }
    }

    pub fn mark_source_done(&self, source: &ProducerId) {
        let mut st = self.mu.lock().expect("page buffer lock");
        let Some(state) = st.sources.get_mut(source) else {
            return;
        };
        if state.is_terminal() {
            return;
        }
        *state = SourceState::Finished;
        let finished = st
            .sources
            .values()
            .filter(|s| **s == SourceState::Finished)
            .count();
        debug!(
            "page buffer source FINISHED: source={} finished={}/{}",
            source,
            finished,
            st.sources.len()
        );
        self.not_empty.notify_all();
    }

    /// Records a fatal source failure. The first failure wins.
    pub fn mark_source_failed(&self, source: &ProducerId, cause: ExchangeError) {
        let mut st = self.mu.lock().expect("page buffer lock");
        let Some(state) = st.sources.get_mut(source) else {
            return;
        };
        if state.is_terminal() {
            return;
        }
        *state = SourceState::Failed;
        if st.failure.is_none() {
            debug!(
                "page buffer source FAILED: source={} policy={:?} queued={} cause={}",
                source,
                self.policy,
                st.pages.len(),
                cause
            );
            st.failure = Some(ExchangeError::BufferPropagatedFailure {
                producer: source.clone(),
                cause: Box::new(cause),
            });
            if self.policy == FailurePolicy::FailFast {
                st.discard_queued();
            }
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wakes every waiter; later `put` and `take` fail with `Canceled`.
    pub fn cancel(&self) {
        let mut st = self.mu.lock().expect("page buffer lock");
        if st.canceled {
            return;
        }
        st.canceled = true;
        st.discard_queued();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_canceled(&self) -> bool {
        self.mu.lock().expect("page buffer lock").canceled
    }

    /// The propagated failure, once any source has failed.
    pub fn failure(&self) -> Option<ExchangeError> {
        self.mu.lock().expect("page buffer lock").failure.clone()
    }

    /// True once every source is terminal and the queue has drained.
    pub fn is_complete(&self) -> bool {
        let st = self.mu.lock().expect("page buffer lock");
        st.pages.is_empty() && st.all_sources_terminal()
    }

    /// Sleeps up to `timeout`, returning early with `true` when the buffer is
    /// canceled or has failed.
    pub fn wait_for_abort(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.mu.lock().expect("page buffer lock");
        loop {
            if st.canceled || st.failure.is_some() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .not_full
                .wait_timeout(st, deadline - now)
                .expect("page buffer condvar wait");
            st = next;
        }
    }

    pub fn snapshot(&self) -> PageBufferSnapshot {
        let st = self.mu.lock().expect("page buffer lock");
        PageBufferSnapshot {
            capacity: self.capacity,
            queued_pages: st.pages.len(),
            queued_bytes: st.queued_bytes,
            peak_queued_pages: st.peak_queued_pages,
            registered_sources: st.sources.len(),
            finished_sources: st
                .sources
                .values()
                .filter(|s| **s == SourceState::Finished)
                .count(),
            failed_sources: st
                .sources
                .values()
                .filter(|s| **s == SourceState::Failed)
                .count(),
            failed: st.failure.is_some(),
            canceled: st.canceled,
            stats: st.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use arrow::array::{Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn page(values: Vec<i64>) -> Page {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
        Page::new(batch)
    }

    fn first_value(page: &Page) -> i64 {
        page.columns()[0]
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0)
    }

    fn buffer_with(sources: &[&str], capacity: usize, policy: FailurePolicy) -> PageBuffer {
        let buffer = PageBuffer::new(capacity, policy);
        for s in sources {
            buffer.register_source(ProducerId::from(*s)).unwrap();
        }
        buffer
    }

    #[test]
    fn take_returns_end_of_stream_after_all_sources_finish() {
        let buffer = buffer_with(&["a", "b"], 4, FailurePolicy::FailFast);
        let a = ProducerId::from("a");
        let b = ProducerId::from("b");
        buffer.put(&a, page(vec![1])).unwrap();
        buffer.mark_source_done(&a);
        buffer.mark_source_done(&b);
        assert!(!buffer.is_complete());
        assert_eq!(first_value(&buffer.take().unwrap().unwrap()), 1);
        assert!(buffer.take().unwrap().is_none());
        assert!(buffer.is_complete());
    }

    #[test]
    fn no_sources_means_immediate_end_of_stream() {
        let buffer = PageBuffer::new(1, FailurePolicy::FailFast);
        assert!(buffer.take().unwrap().is_none());
    }

    #[test]
    fn duplicate_source_is_rejected() {
        let buffer = buffer_with(&["a"], 1, FailurePolicy::FailFast);
        let err = buffer.register_source(ProducerId::from("a")).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDescriptor(_)));
    }

    #[test]
    fn try_put_hands_page_back_when_full() {
        let buffer = buffer_with(&["a"], 1, FailurePolicy::FailFast);
        let a = ProducerId::from("a");
        assert!(buffer.try_put(&a, page(vec![1])).unwrap().is_none());
        let rejected = buffer.try_put(&a, page(vec![2])).unwrap();
        assert_eq!(first_value(&rejected.unwrap()), 2);
        assert_eq!(buffer.snapshot().queued_pages, 1);
    }

    #[test]
    fn put_blocks_until_consumer_drains() {
        let buffer = Arc::new(buffer_with(&["a"], 1, FailurePolicy::FailFast));
        let a = ProducerId::from("a");
        buffer.put(&a, page(vec![1])).unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = {
            let buffer = Arc::clone(&buffer);
            let a = a.clone();
            thread::spawn(move || {
                buffer.put(&a, page(vec![2])).unwrap();
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(first_value(&buffer.take().unwrap().unwrap()), 1);
        rx.recv_timeout(Duration::from_secs(5))
            .expect("blocked put should complete after take");
        producer.join().unwrap();
        assert_eq!(buffer.snapshot().peak_queued_pages, 1);
    }

    #[test]
    fn fail_fast_raises_before_queued_pages() {
        let buffer = buffer_with(&["a", "b"], 4, FailurePolicy::FailFast);
        let a = ProducerId::from("a");
        let b = ProducerId::from("b");
        buffer.put(&a, page(vec![1])).unwrap();
        let cause = ExchangeError::RemoteTaskFailed {
            producer: b.clone(),
            message: "boom".to_string(),
        };
        buffer.mark_source_failed(&b, cause.clone());
        let err = buffer.take().unwrap_err();
        assert_eq!(err.root_cause(), &cause);
        assert_eq!(err.producer(), Some(&b));
        assert!(buffer.put(&a, page(vec![2])).is_err());
    }

    #[test]
    fn drain_first_delivers_queued_pages_then_raises() {
        let buffer = buffer_with(&["a", "b"], 4, FailurePolicy::DrainFirst);
        let a = ProducerId::from("a");
        let b = ProducerId::from("b");
        buffer.put(&a, page(vec![7])).unwrap();
        buffer.mark_source_failed(&b, ExchangeError::Canceled);
        assert_eq!(first_value(&buffer.take().unwrap().unwrap()), 7);
        assert!(matches!(
            buffer.take(),
            Err(ExchangeError::BufferPropagatedFailure { .. })
        ));
    }

    #[test]
    fn cancel_wakes_blocked_consumer() {
        let buffer = Arc::new(buffer_with(&["a"], 1, FailurePolicy::FailFast));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.take())
        };
        thread::sleep(Duration::from_millis(50));
        buffer.cancel();
        assert_eq!(consumer.join().unwrap().unwrap_err(), ExchangeError::Canceled);
        assert!(matches!(
            buffer.put(&ProducerId::from("a"), page(vec![1])),
            Err(ExchangeError::Canceled)
        ));
        assert!(buffer.wait_for_abort(Duration::from_secs(5)));
    }

    #[test]
    fn terminal_marks_are_idempotent() {
        let buffer = buffer_with(&["a"], 1, FailurePolicy::FailFast);
        let a = ProducerId::from("a");
        buffer.mark_source_done(&a);
        buffer.mark_source_failed(&a, ExchangeError::Canceled);
        let snap = buffer.snapshot();
        assert_eq!(snap.finished_sources, 1);
        assert_eq!(snap.failed_sources, 0);
        assert!(!snap.failed);
    }

    #[test]
    fn failure_is_readable_without_taking() {
        let buffer = buffer_with(&["a", "b"], 4, FailurePolicy::DrainFirst);
        let a = ProducerId::from("a");
        buffer.put(&a, page(vec![1])).unwrap();
        assert!(buffer.failure().is_none());
        buffer.mark_source_failed(&a, ExchangeError::Codec("bad page".to_string()));
        let failure = buffer.failure().expect("failure recorded");
        assert_eq!(failure.root_cause(), &ExchangeError::Codec("bad page".to_string()));
        assert_eq!(buffer.snapshot().queued_pages, 1);
    }

    #[test]
    fn snapshot_tracks_receive_stats() {
        let buffer = buffer_with(&["a"], 4, FailurePolicy::FailFast);
        let a = ProducerId::from("a");
        buffer.put(&a, page(vec![1, 2, 3])).unwrap();
        buffer.put(&a, page(vec![4])).unwrap();
        let snap = buffer.snapshot();
        assert_eq!(snap.stats.pages_received, 2);
        assert_eq!(snap.stats.rows_received, 4);
        assert_eq!(snap.queued_pages, 2);
        assert!(snap.queued_bytes > 0);
        assert!(!buffer.wait_for_abort(Duration::from_millis(10)));
    }
}
