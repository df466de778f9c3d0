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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use tempfile::TempDir;
use url::Url;

use pagewire::common::app_config::PageWireConfig;
use pagewire::common::error::Result;
use pagewire::common::ids::{OutputId, ProducerId};
use pagewire::common::types::ColumnType;
use pagewire::connector::DataStreamProvider;
use pagewire::exec::page::Page;
use pagewire::exec::pipeline::operator::{PageStream, VecPageStream};
use pagewire::exec::source::{ColumnHandle, RemoteProducer, Split};
use pagewire::pagewire_logging;
use pagewire::runtime::remote_task_client::{RemoteTaskClient, RetryPolicy};
use pagewire::runtime::task_status::{RemoteTaskState, TaskStatus, TaskStatusCodec};
use pagewire::runtime::task_transport::{TaskRequest, TaskTransport, TransportError};

pub const OUTPUT: &str = "out-0";

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_pagewire.toml");

        let config_content = r#"
log_level = "debug"

[exchange]
page_buffer_max = 4
connect_timeout_ms = 1000
read_timeout_ms = 1500
worker_threads = 2
worker_queue_capacity = 3
max_transient_retries = 2
retry_base_backoff_ms = 10
retry_max_backoff_ms = 40
empty_poll_delay_ms = 5
failure_policy = "drain_first"
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        pagewire_logging::init_with_level("debug");
    }

    /// Load the test configuration without touching the process-wide config.
    pub fn load_config(&self) -> anyhow::Result<PageWireConfig> {
        PageWireConfig::load_from_file(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Single-column bigint page.
pub fn int_page(values: &[i64]) -> Page {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    let batch =
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))]).unwrap();
    Page::new(batch)
}

pub fn page_values(page: &Page) -> Vec<i64> {
    page.columns()[0]
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("bigint column")
        .values()
        .to_vec()
}

pub fn bigint_schema() -> Vec<ColumnType> {
    vec![ColumnType::Bigint]
}

pub fn producer_url(id: &str) -> Url {
    Url::parse(&format!("http://{id}.producers.test:8080/task/{id}")).unwrap()
}

pub fn remote_producer(id: &str) -> RemoteProducer {
    RemoteProducer::new(id, producer_url(id))
}

/// Retry policy with short delays so failure paths finish quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_transient_retries: 2,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        empty_poll_delay: Duration::from_millis(2),
    }
}

pub fn running(next_token: u64, pages: Vec<Page>) -> TaskStatus {
    TaskStatus::running("task", OutputId::from(OUTPUT), next_token).with_pages(pages)
}

pub fn finished(next_token: u64, pages: Vec<Page>) -> TaskStatus {
    running(next_token, pages).with_state(RemoteTaskState::Finished)
}

pub fn failed(message: &str) -> TaskStatus {
    running(0, vec![])
        .with_state(RemoteTaskState::Failed)
        .with_failure(message)
}

pub fn timeout_error() -> TransportError {
    TransportError::Timeout {
        url: "http://scripted".to_string(),
        message: "operation timed out".to_string(),
    }
}

/// One scripted answer, optionally delayed.
pub struct Step {
    pub delay: Duration,
    pub reply: std::result::Result<TaskStatus, TransportError>,
}

impl From<TaskStatus> for Step {
    fn from(status: TaskStatus) -> Self {
        Step {
            delay: Duration::ZERO,
            reply: Ok(status),
        }
    }
}

impl From<TransportError> for Step {
    fn from(err: TransportError) -> Self {
        Step {
            delay: Duration::ZERO,
            reply: Err(err),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub location: String,
    pub token: u64,
    pub thread: Option<String>,
}

/// In-memory transport answering from per-location scripts.
///
/// Once a script runs out, the producer answers RUNNING with no pages, or repeats
/// its last error when `sticky_errors` is set.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    sticky_errors: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sticky_errors() -> Self {
        Self {
            sticky_errors: true,
            ..Self::default()
        }
    }

    pub fn script(&self, producer: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(producer_url(producer).to_string(), steps.into());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests_to(&self, producer: &str) -> Vec<u64> {
        let location = producer_url(producer).to_string();
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.location == location)
            .map(|r| r.token)
            .collect()
    }
}

impl TaskTransport for ScriptedTransport {
    fn fetch_results(
        &self,
        request: &TaskRequest,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let location = request.location.to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            location: location.clone(),
            token: request.token,
            thread: std::thread::current().name().map(str::to_string),
        });
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(location).or_default();
            match script.pop_front() {
                Some(step) => {
                    if self.sticky_errors && script.is_empty() {
                        if let Err(err) = &step.reply {
                            script.push_back(Step::from(err.clone()));
                        }
                    }
                    step
                }
                None => Step::from(running(request.token, vec![])),
            }
        };
        if !step.delay.is_zero() {
            std::thread::sleep(step.delay);
        }
        let status = step.reply?;
        Ok(TaskStatusCodec.encode(&status).expect("encode scripted status"))
    }
}

/// Local provider that records its calls and serves fixed pages.
#[derive(Default)]
pub struct RecordingProvider {
    pub calls: Mutex<Vec<(Split, Vec<ColumnHandle>)>>,
    pub pages: Vec<Page>,
}

impl DataStreamProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn create_data_stream(
        &self,
        split: &Split,
        required_columns: &[ColumnHandle],
    ) -> Result<Box<dyn PageStream>> {
        self.calls
            .lock()
            .unwrap()
            .push((split.clone(), required_columns.to_vec()));
        Ok(Box::new(VecPageStream::new("recorded", self.pages.clone())))
    }
}

pub fn client_for(
    producer: &str,
    transport: Arc<dyn TaskTransport>,
    retry: RetryPolicy,
) -> RemoteTaskClient {
    RemoteTaskClient::new(
        ProducerId::from(producer),
        producer_url(producer),
        OutputId::from(OUTPUT),
        bigint_schema(),
        transport,
        retry,
    )
}

/// Drains a stream, failing on the first error.
pub fn drain(stream: &mut dyn PageStream) -> Vec<Page> {
    let mut pages = Vec::new();
    while let Some(page) = stream.next_page().expect("next page") {
        pages.push(page);
    }
    pages
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}
