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
use std::fmt;
use std::io::Cursor;

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::common::error::{ExchangeError, Result};
use crate::common::ids::OutputId;
use crate::exec::page::Page;

/// Lifecycle state reported by a remote task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteTaskState {
    Running,
    Finished,
    Failed,
    Canceled,
}

impl RemoteTaskState {
    /// FAILED or CANCELED: the task will produce nothing more.
    pub fn is_failed(self) -> bool {
        matches!(self, RemoteTaskState::Failed | RemoteTaskState::Canceled)
    }
}

impl fmt::Display for RemoteTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteTaskState::Running => "RUNNING",
            RemoteTaskState::Finished => "FINISHED",
            RemoteTaskState::Failed => "FAILED",
            RemoteTaskState::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Decoded result of one results request.
#[derive(Clone, Debug)]
pub struct TaskStatus {
    pub task_id: String,
    pub output_id: OutputId,
    pub state: RemoteTaskState,
    pub next_token: u64,
    pub pages: Vec<Page>,
    pub failures: Vec<String>,
}

impl TaskStatus {
    pub fn running(task_id: impl Into<String>, output_id: OutputId, next_token: u64) -> Self {
        Self {
            task_id: task_id.into(),
            output_id,
            state: RemoteTaskState::Running,
            next_token,
            pages: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: RemoteTaskState) -> Self {
        self.state = state;
        self
    }

    pub fn with_pages(mut self, pages: Vec<Page>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_failure(mut self, failure: impl Into<String>) -> Self {
        self.failures.push(failure.into());
        self
    }

    /// Human readable reason for a failed or canceled task.
    pub fn failure_message(&self) -> String {
        if self.failures.is_empty() {
            format!("remote task {} reported {}", self.task_id, self.state)
        } else {
            self.failures.join("; ")
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStatusEnvelope {
    task_id: String,
    output_id: OutputId,
    state: RemoteTaskState,
    next_token: u64,
    #[serde(default)]
    pages: Vec<String>,
    #[serde(default)]
    failures: Vec<String>,
}

/// JSON envelope codec. Pages travel as base64 encoded Arrow IPC streams.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskStatusCodec;

impl TaskStatusCodec {
    pub fn encode(&self, status: &TaskStatus) -> Result<Vec<u8>> {
        let pages = status
            .pages
            .iter()
            .map(|p| self.encode_page(p))
            .collect::<Result<Vec<_>>>()?;
        let envelope = TaskStatusEnvelope {
            task_id: status.task_id.clone(),
            output_id: status.output_id.clone(),
            state: status.state,
            next_token: status.next_token,
            pages,
            failures: status.failures.clone(),
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| ExchangeError::Codec(format!("failed to encode task status: {e}")))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<TaskStatus> {
        let envelope: TaskStatusEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ExchangeError::Codec(format!("malformed task status envelope: {e}")))?;
        let pages = envelope
            .pages
            .iter()
            .enumerate()
            .map(|(idx, encoded)| {
                self.decode_page(encoded).map_err(|e| {
                    ExchangeError::Codec(format!("page {idx} of task {}: {e}", envelope.task_id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskStatus {
            task_id: envelope.task_id,
            output_id: envelope.output_id,
            state: envelope.state,
            next_token: envelope.next_token,
            pages,
            failures: envelope.failures,
        })
    }

    pub fn encode_page(&self, page: &Page) -> Result<String> {
        let mut buffer = Vec::new();
        let mut writer = StreamWriter::try_new(&mut buffer, page.schema().as_ref())
            .map_err(|e| ExchangeError::Codec(format!("failed to create Arrow IPC writer: {e}")))?;
        writer
            .write(&page.batch)
            .map_err(|e| ExchangeError::Codec(format!("failed to write batch: {e}")))?;
        writer
            .finish()
            .map_err(|e| ExchangeError::Codec(format!("failed to finish Arrow IPC writer: {e}")))?;
        drop(writer);
        Ok(BASE64.encode(buffer))
    }

    /// Decodes one page. The IPC stream must carry exactly one batch.
    pub fn decode_page(&self, encoded: &str) -> Result<Page> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ExchangeError::Codec(format!("invalid base64 page: {e}")))?;
        let reader = StreamReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| ExchangeError::Codec(format!("failed to create Arrow IPC reader: {e}")))?;
        let mut batches = Vec::with_capacity(1);
        for batch in reader {
            let batch =
                batch.map_err(|e| ExchangeError::Codec(format!("failed to read batch: {e}")))?;
            batches.push(batch);
        }
        if batches.len() != 1 {
            return Err(ExchangeError::Codec(format!(
                "expected exactly one batch per page, found {}",
                batches.len()
            )));
        }
        Ok(Page::new(batches.remove(0)))
    }
}
