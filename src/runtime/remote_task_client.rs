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
//! Client side of the results protocol for a single remote producer.
//!
//! A client never retries internally and never buffers pages: each `poll` is one
//! request, and transient failures come back as `NoDataYet` with a backoff so the
//! caller decides when to poll again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use crate::common::error::ExchangeError;
use crate::common::ids::{OutputId, ProducerId};
use crate::common::types::ColumnType;
use crate::exec::page::Page;
use crate::pagewire_logging::{debug, warn};
use crate::runtime::task_status::{RemoteTaskState, TaskStatus, TaskStatusCodec};
use crate::runtime::task_transport::{TaskRequest, TaskTransport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive transient failures tolerated before the source fails.
    pub max_transient_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Delay before re-polling a running task that had nothing to return.
    pub empty_poll_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            empty_poll_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th consecutive failure: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClientState {
    Running,
    Finished,
    Failed,
    Canceled,
}

#[derive(Debug)]
pub enum PollResult {
    Pages { pages: Vec<Page>, next_token: u64 },
    NoDataYet { retry_after: Duration },
    Finished,
    Failed(ExchangeError),
}

#[derive(Clone, Debug)]
pub struct RemoteTaskClientSnapshot {
    pub producer_id: ProducerId,
    pub state: ClientState,
    pub next_token: u64,
    pub retry_counter: u32,
    pub requests_sent: u64,
    pub last_seen: Option<Instant>,
    pub last_remote_state: Option<RemoteTaskState>,
}

pub struct RemoteTaskClient {
    producer_id: ProducerId,
    location: Url,
    output_id: OutputId,
    schema: Vec<ColumnType>,
    transport: Arc<dyn TaskTransport>,
    codec: TaskStatusCodec,
    retry: RetryPolicy,

    state: ClientState,
    next_token: u64,
    retry_counter: u32,
    requests_sent: u64,
    last_seen: Option<Instant>,
    // Pages are moved out before the status is kept.
    last_status: Option<TaskStatus>,
    failure: Option<ExchangeError>,
}

impl RemoteTaskClient {
    pub fn new(
        producer_id: ProducerId,
        location: Url,
        output_id: OutputId,
        schema: Vec<ColumnType>,
        transport: Arc<dyn TaskTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            producer_id,
            location,
            output_id,
            schema,
            transport,
            codec: TaskStatusCodec,
            retry,
            state: ClientState::Running,
            next_token: 0,
            retry_counter: 0,
            requests_sent: 0,
            last_seen: None,
            last_status: None,
            failure: None,
        }
    }

    pub fn poll(&mut self) -> PollResult {
        match self.state {
            ClientState::Running => {}
            ClientState::Finished => return PollResult::Finished,
            ClientState::Canceled => return PollResult::Failed(ExchangeError::Canceled),
            ClientState::Failed => {
                let failure = self.failure.clone().unwrap_or(ExchangeError::RemoteTaskFailed {
                    producer: self.producer_id.clone(),
                    message: "remote task failed".to_string(),
                });
                return PollResult::Failed(failure);
            }
        }

        let request = TaskRequest {
            location: self.location.clone(),
            output_id: self.output_id.clone(),
            token: self.next_token,
        };
        self.requests_sent = self.requests_sent.saturating_add(1);
        let outcome = self
            .transport
            .fetch_results(&request)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.codec.decode(&bytes).map_err(|e| e.to_string()))
            .and_then(|status| self.check_status(status));
        self.last_seen = Some(Instant::now());

        match outcome {
            Ok(status) => self.on_status(status),
            Err(message) => self.on_transient_failure(message),
        }
    }

    fn check_status(&self, status: TaskStatus) -> Result<TaskStatus, String> {
        if status.output_id != self.output_id {
            return Err(format!(
                "response for output {} while reading output {}",
                status.output_id, self.output_id
            ));
        }
        if !status.state.is_failed() {
            for page in &status.pages {
                page.conforms_to(&self.schema)?;
            }
        }
        Ok(status)
    }

    fn on_status(&mut self, mut status: TaskStatus) -> PollResult {
        self.retry_counter = 0;
        let pages = std::mem::take(&mut status.pages);
        let remote_state = status.state;
        let next_token = status.next_token;
        let failure_message = status.failure_message();
        self.last_status = Some(status);

        match remote_state {
            RemoteTaskState::Failed | RemoteTaskState::Canceled => {
                let failure = ExchangeError::RemoteTaskFailed {
                    producer: self.producer_id.clone(),
                    message: failure_message,
                };
                warn!(
                    "remote task FAILED: producer={} output={} state={} discarded_pages={} cause={}",
                    self.producer_id,
                    self.output_id,
                    remote_state,
                    pages.len(),
                    failure
                );
                self.state = ClientState::Failed;
                self.failure = Some(failure.clone());
                PollResult::Failed(failure)
            }
            RemoteTaskState::Finished => {
                self.next_token = next_token;
                self.state = ClientState::Finished;
                debug!(
                    "remote task FINISHED: producer={} output={} token={} last_pages={}",
                    self.producer_id,
                    self.output_id,
                    next_token,
                    pages.len()
                );
                if pages.is_empty() {
                    PollResult::Finished
                } else {
                    PollResult::Pages { pages, next_token }
                }
            }
            RemoteTaskState::Running => {
                self.next_token = next_token;
                if pages.is_empty() {
                    PollResult::NoDataYet {
                        retry_after: self.retry.empty_poll_delay,
                    }
                } else {
                    PollResult::Pages { pages, next_token }
                }
            }
        }
    }

    fn on_transient_failure(&mut self, message: String) -> PollResult {
        self.retry_counter = self.retry_counter.saturating_add(1);
        if self.retry_counter > self.retry.max_transient_retries {
            let failure = ExchangeError::RemoteTransientFailure {
                producer: self.producer_id.clone(),
                attempts: self.retry_counter,
                message,
            };
            warn!(
                "remote task retries EXHAUSTED: producer={} output={} cause={}",
                self.producer_id, self.output_id, failure
            );
            self.state = ClientState::Failed;
            self.failure = Some(failure.clone());
            return PollResult::Failed(failure);
        }
        let retry_after = self.retry.backoff(self.retry_counter);
        debug!(
            "remote task transient failure: producer={} attempt={}/{} retry_after={:?} cause={}",
            self.producer_id,
            self.retry_counter,
            self.retry.max_transient_retries,
            retry_after,
            message
        );
        PollResult::NoDataYet { retry_after }
    }

    /// Stops the client; later polls issue no request.
    pub fn cancel(&mut self) {
        if self.state != ClientState::Canceled {
            debug!(
                "remote task client CANCELED: producer={} state={:?} requests={}",
                self.producer_id, self.state, self.requests_sent
            );
        }
        self.state = ClientState::Canceled;
    }

    pub fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn output_id(&self) -> &OutputId {
        &self.output_id
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn next_token(&self) -> u64 {
        self.next_token
    }

    pub fn retry_counter(&self) -> u32 {
        self.retry_counter
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn last_status(&self) -> Option<&TaskStatus> {
        self.last_status.as_ref()
    }

    pub fn failure(&self) -> Option<&ExchangeError> {
        self.failure.as_ref()
    }

    pub fn snapshot(&self) -> RemoteTaskClientSnapshot {
        RemoteTaskClientSnapshot {
            producer_id: self.producer_id.clone(),
            state: self.state,
            next_token: self.next_token,
            retry_counter: self.retry_counter,
            requests_sent: self.requests_sent,
            last_seen: self.last_seen,
            last_remote_state: self.last_status.as_ref().map(|s| s.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use arrow::array::{Int64Array, RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;
    use crate::runtime::task_transport::TransportError;

    type Reply = Result<Vec<u8>, TransportError>;

    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        tokens: Mutex<Vec<u64>>,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                tokens: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<u64> {
            self.tokens.lock().unwrap().clone()
        }
    }

    impl TaskTransport for Scripted {
        fn fetch_results(&self, request: &TaskRequest) -> Result<Vec<u8>, TransportError> {
            self.tokens.lock().unwrap().push(request.token);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::InvalidUrl("script exhausted".into())))
        }
    }

    fn page(v: i64) -> Page {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        Page::new(RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![v]))]).unwrap())
    }

    fn envelope(state: RemoteTaskState, next_token: u64, pages: Vec<Page>) -> Reply {
        let status = TaskStatus::running("task", OutputId::from("out"), next_token)
            .with_state(state)
            .with_pages(pages);
        Ok(TaskStatusCodec.encode(&status).unwrap())
    }

    fn timeout() -> Reply {
        Err(TransportError::Timeout {
            url: "http://p".into(),
            message: "read timed out".into(),
        })
    }

    fn client(transport: Arc<Scripted>, retry: RetryPolicy) -> RemoteTaskClient {
        RemoteTaskClient::new(
            ProducerId::from("p1"),
            Url::parse("http://producer:8080/task/1").unwrap(),
            OutputId::from("out"),
            vec![ColumnType::Bigint],
            transport,
            retry,
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(5), Duration::from_millis(1600));
        assert_eq!(retry.backoff(6), Duration::from_secs(2));
        assert_eq!(retry.backoff(40), Duration::from_secs(2));
    }

    #[test]
    fn pages_advance_the_cursor() {
        let transport = Scripted::new(vec![
            envelope(RemoteTaskState::Running, 1, vec![page(1)]),
            envelope(RemoteTaskState::Running, 1, vec![]),
            envelope(RemoteTaskState::Finished, 2, vec![page(2)]),
        ]);
        let mut c = client(Arc::clone(&transport), RetryPolicy::default());

        assert!(matches!(c.poll(), PollResult::Pages { next_token: 1, .. }));
        assert_eq!(c.next_token(), 1);
        match c.poll() {
            PollResult::NoDataYet { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(50))
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
        match c.poll() {
            PollResult::Pages { pages, next_token } => {
                assert_eq!(pages.len(), 1);
                assert_eq!(next_token, 2);
            }
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert_eq!(c.state(), ClientState::Finished);
        assert!(matches!(c.poll(), PollResult::Finished));
        assert!(matches!(c.poll(), PollResult::Finished));
        assert_eq!(transport.requests(), vec![0, 1, 1]);
        assert!(c.last_seen().is_some());
        assert_eq!(
            c.last_status().map(|s| s.state),
            Some(RemoteTaskState::Finished)
        );
    }

    #[test]
    fn remote_failure_discards_pages_and_sticks() {
        let transport = Scripted::new(vec![envelope(
            RemoteTaskState::Failed,
            3,
            vec![page(9)],
        )]);
        let mut c = client(Arc::clone(&transport), RetryPolicy::default());
        let PollResult::Failed(err) = c.poll() else {
            panic!("expected failure");
        };
        assert!(matches!(err, ExchangeError::RemoteTaskFailed { .. }));
        assert!(matches!(
            c.poll(),
            PollResult::Failed(ExchangeError::RemoteTaskFailed { .. })
        ));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(c.next_token(), 0);
    }

    #[test]
    fn transient_failures_back_off_then_fail() {
        let retry = RetryPolicy {
            max_transient_retries: 2,
            ..RetryPolicy::default()
        };
        let transport = Scripted::new(vec![timeout(), timeout(), timeout()]);
        let mut c = client(Arc::clone(&transport), retry);

        assert!(matches!(
            c.poll(),
            PollResult::NoDataYet { retry_after } if retry_after == Duration::from_millis(100)
        ));
        assert!(matches!(
            c.poll(),
            PollResult::NoDataYet { retry_after } if retry_after == Duration::from_millis(200)
        ));
        let PollResult::Failed(err) = c.poll() else {
            panic!("expected retries to be exhausted");
        };
        assert!(matches!(
            err,
            ExchangeError::RemoteTransientFailure { attempts: 3, .. }
        ));
        assert_eq!(c.state(), ClientState::Failed);
    }

    #[test]
    fn success_resets_retry_counter() {
        let transport = Scripted::new(vec![
            timeout(),
            envelope(RemoteTaskState::Running, 1, vec![page(1)]),
        ]);
        let mut c = client(transport, RetryPolicy::default());
        c.poll();
        assert_eq!(c.retry_counter(), 1);
        c.poll();
        assert_eq!(c.retry_counter(), 0);
    }

    #[test]
    fn schema_violation_is_transient() {
        let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)]));
        let bad = Page::new(
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["x"]))]).unwrap(),
        );
        let transport = Scripted::new(vec![envelope(RemoteTaskState::Running, 1, vec![bad])]);
        let mut c = client(transport, RetryPolicy::default());
        assert!(matches!(c.poll(), PollResult::NoDataYet { .. }));
        assert_eq!(c.retry_counter(), 1);
        assert_eq!(c.next_token(), 0);
    }

    #[test]
    fn canceled_client_sends_nothing() {
        let transport = Scripted::new(vec![envelope(RemoteTaskState::Running, 1, vec![page(1)])]);
        let mut c = client(Arc::clone(&transport), RetryPolicy::default());
        c.cancel();
        assert!(matches!(
            c.poll(),
            PollResult::Failed(ExchangeError::Canceled)
        ));
        assert!(transport.requests().is_empty());
        assert_eq!(c.snapshot().state, ClientState::Canceled);
    }
}
