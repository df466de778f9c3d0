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
//! Exchange source fanning in pages from remote producers.
//!
//! Responsibilities:
//! - Drives one `RemoteTaskClient` per producer on the shared worker pool.
//! - Merges fetched pages into a bounded `PageBuffer` and exposes it as a `PageStream`.
//! - Propagates the first fatal source failure and stops all polling on close.
//!
//! Key exported interfaces:
//! - Types: `ExchangeOperator`, `ExchangeStats`.
//!
//! Current limitations:
//! - Pages from different producers interleave in arrival order; there is no merge by key.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::common::error::{ExchangeError, Result};
use crate::common::ids::{OutputId, ProducerId};
use crate::exec::page::Page;
use crate::exec::pipeline::operator::PageStream;
use crate::pagewire_logging::debug;
use crate::runtime::page_buffer::{FailurePolicy, PageBuffer, PageBufferSnapshot};
use crate::runtime::remote_task_client::{
    ClientState, PollResult, RemoteTaskClient, RemoteTaskClientSnapshot,
};
use crate::runtime::worker_pool::WorkerPool;

static EXCHANGE_SOURCE_STEP_LOG_COUNT: AtomicU64 = AtomicU64::new(0);

fn should_log_exchange_source_step() -> bool {
    let count = EXCHANGE_SOURCE_STEP_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    count % 1024 == 0
}

#[derive(Clone, Debug)]
pub struct ExchangeStats {
    pub started: bool,
    pub buffer: PageBufferSnapshot,
    pub producers: Vec<RemoteTaskClientSnapshot>,
}

struct ProducerSlot {
    client: RemoteTaskClient,
    // Pages polled but not yet accepted by the buffer, in producer order.
    pending: VecDeque<Page>,
    not_before: Option<Instant>,
}

struct ExchangeShared {
    name: String,
    buffer: Arc<PageBuffer>,
    pool: Arc<WorkerPool>,
    producers: Vec<ProducerId>,
    slots: Vec<Mutex<ProducerSlot>>,
    // Refreshed after every poll so diagnostics never wait on a busy slot.
    diagnostics: Vec<Mutex<RemoteTaskClientSnapshot>>,
    canceled: AtomicBool,
}

enum StepOutcome {
    /// Source is terminal or abandoned; no further steps.
    Done,
    /// Schedule another step.
    Continue,
}

impl ExchangeShared {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn record(&self, index: usize, client: &RemoteTaskClient) {
        *self.diagnostics[index]
            .lock()
            .expect("exchange diagnostics lock") = client.snapshot();
    }

    /// Moves pending pages into the buffer. `Ok(false)` means the buffer was full and
    /// the caller must not block.
    fn deliver(
        &self,
        producer: &ProducerId,
        pending: &mut VecDeque<Page>,
        may_block: bool,
    ) -> Result<bool> {
        while let Some(page) = pending.pop_front() {
            if self.is_canceled() {
                return Err(ExchangeError::Canceled);
            }
            if may_block {
                self.buffer.put(producer, page)?;
            } else if let Some(page) = self.buffer.try_put(producer, page)? {
                pending.push_front(page);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn step(&self, index: usize) -> StepOutcome {
        let in_worker = WorkerPool::is_worker_thread();
        let producer = &self.producers[index];

        let wait = {
            let mut slot = self.slots[index].lock().expect("exchange slot lock");
            if self.is_canceled() {
                slot.client.cancel();
                slot.pending.clear();
                self.record(index, &slot.client);
                return StepOutcome::Done;
            }
            slot.not_before
                .map(|t| t.saturating_duration_since(Instant::now()))
                .filter(|d| !d.is_zero())
        };
        if let Some(wait) = wait {
            if !in_worker {
                return StepOutcome::Continue;
            }
            if self.buffer.wait_for_abort(wait) {
                let mut slot = self.slots[index].lock().expect("exchange slot lock");
                slot.client.cancel();
                self.record(index, &slot.client);
                return StepOutcome::Done;
            }
        }

        let mut slot = self.slots[index].lock().expect("exchange slot lock");
        slot.not_before = None;

        let ProducerSlot {
            client,
            pending,
            not_before,
        } = &mut *slot;
        match self.deliver(producer, pending, in_worker) {
            Ok(true) => {}
            Ok(false) => return StepOutcome::Continue,
            Err(_) => {
                client.cancel();
                pending.clear();
                self.record(index, client);
                return StepOutcome::Done;
            }
        }
        if client.state() == ClientState::Finished {
            self.buffer.mark_source_done(producer);
            return StepOutcome::Done;
        }
        if self.is_canceled() {
            client.cancel();
            self.record(index, client);
            return StepOutcome::Done;
        }

        let result = client.poll();
        if self.is_canceled() {
            // In-flight result is discarded.
            client.cancel();
            self.record(index, client);
            return StepOutcome::Done;
        }
        self.record(index, client);
        if should_log_exchange_source_step() {
            debug!(
                "{} step: producer={} in_worker={} result={}",
                self.name,
                producer,
                in_worker,
                poll_result_label(&result)
            );
        }

        match result {
            PollResult::Pages { pages, .. } => {
                pending.extend(pages);
                match self.deliver(producer, pending, in_worker) {
                    Ok(true) if client.state() == ClientState::Finished => {
                        self.buffer.mark_source_done(producer);
                        StepOutcome::Done
                    }
                    Ok(_) => StepOutcome::Continue,
                    Err(_) => {
                        client.cancel();
                        pending.clear();
                        self.record(index, client);
                        StepOutcome::Done
                    }
                }
            }
            PollResult::NoDataYet { retry_after } => {
                *not_before = Some(Instant::now() + retry_after);
                StepOutcome::Continue
            }
            PollResult::Finished => {
                self.buffer.mark_source_done(producer);
                StepOutcome::Done
            }
            PollResult::Failed(ExchangeError::Canceled) => StepOutcome::Done,
            PollResult::Failed(err) => {
                self.buffer.mark_source_failed(producer, err);
                StepOutcome::Done
            }
        }
    }
}

fn poll_result_label(result: &PollResult) -> String {
    match result {
        PollResult::Pages { pages, next_token } => {
            format!("pages={} next_token={}", pages.len(), next_token)
        }
        PollResult::NoDataYet { retry_after } => format!("no_data retry_after={retry_after:?}"),
        PollResult::Finished => "finished".to_string(),
        PollResult::Failed(err) => format!("failed: {err}"),
    }
}

/// Runs polling steps for one producer until it is terminal or handed back to the pool.
///
/// On a worker thread a saturated pool means the loop keeps going here. On any other
/// thread the next step is always queued, so the caller never blocks on the buffer.
/// Non-worker steps only come from a caller-run `start`, so each producer forces at
/// most one task past the queue bound.
fn drive_producer(shared: Arc<ExchangeShared>, index: usize) {
    loop {
        match shared.step(index) {
            StepOutcome::Done => return,
            StepOutcome::Continue => {
                let next = Arc::clone(&shared);
                if WorkerPool::is_worker_thread() {
                    if shared
                        .pool
                        .try_submit(move || drive_producer(next, index))
                        .is_ok()
                    {
                        return;
                    }
                } else {
                    shared.pool.force_submit(move || drive_producer(next, index));
                    return;
                }
            }
        }
    }
}

/// Input operator over a set of remote producers.
pub struct ExchangeOperator {
    shared: Arc<ExchangeShared>,
    started: bool,
    closed: bool,
    peeked: Option<Page>,
    seen_pages: usize,
    seen_rows: usize,
}

impl ExchangeOperator {
    /// Registers every client with the buffer. Nothing is polled until the stream is first driven.
    pub fn new(
        output_id: OutputId,
        clients: Vec<RemoteTaskClient>,
        buffer: Arc<PageBuffer>,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        let mut producers = Vec::with_capacity(clients.len());
        let mut slots = Vec::with_capacity(clients.len());
        let mut diagnostics = Vec::with_capacity(clients.len());
        for client in clients {
            buffer.register_source(client.producer_id().clone())?;
            producers.push(client.producer_id().clone());
            diagnostics.push(Mutex::new(client.snapshot()));
            slots.push(Mutex::new(ProducerSlot {
                client,
                pending: VecDeque::new(),
                not_before: None,
            }));
        }
        let name = format!("EXCHANGE_SOURCE (output={output_id})");
        debug!(
            "{} created: producers={} capacity={} policy={:?}",
            name,
            producers.len(),
            buffer.capacity(),
            buffer.policy()
        );
        Ok(Self {
            shared: Arc::new(ExchangeShared {
                name,
                buffer,
                pool,
                producers,
                slots,
                diagnostics,
                canceled: AtomicBool::new(false),
            }),
            started: false,
            closed: false,
            peeked: None,
            seen_pages: 0,
            seen_rows: 0,
        })
    }

    /// Submits one polling task per producer. Implied by the first `has_next`/`next_page`.
    pub fn start(&mut self) {
        if self.started || self.closed {
            return;
        }
        self.started = true;
        for index in 0..self.shared.producers.len() {
            let shared = Arc::clone(&self.shared);
            self.shared.pool.submit(move || drive_producer(shared, index));
        }
    }

    /// A page held back by `has_next` is dropped once a fail-fast failure lands.
    fn check_peeked(&mut self) -> Result<()> {
        if self.peeked.is_none() || self.shared.buffer.policy() != FailurePolicy::FailFast {
            return Ok(());
        }
        match self.shared.buffer.failure() {
            Some(failure) => {
                self.peeked = None;
                Err(failure)
            }
            None => Ok(()),
        }
    }

    fn take(&mut self) -> Result<Option<Page>> {
        self.check_peeked()?;
        if let Some(page) = self.peeked.take() {
            return Ok(Some(page));
        }
        self.start();
        let page = self.shared.buffer.take()?;
        if let Some(p) = page.as_ref() {
            self.seen_pages = self.seen_pages.saturating_add(1);
            self.seen_rows = self.seen_rows.saturating_add(p.num_rows());
        }
        Ok(page)
    }

    pub fn producer_ids(&self) -> &[ProducerId] {
        &self.shared.producers
    }

    pub fn stats(&self) -> ExchangeStats {
        ExchangeStats {
            started: self.started,
            buffer: self.shared.buffer.snapshot(),
            producers: self
                .shared
                .diagnostics
                .iter()
                .map(|d| d.lock().expect("exchange diagnostics lock").clone())
                .collect(),
        }
    }
}

impl PageStream for ExchangeOperator {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn has_next(&mut self) -> Result<bool> {
        self.check_peeked()?;
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.take()? {
            Some(page) => {
                self.peeked = Some(page);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_page(&mut self) -> Result<Option<Page>> {
        self.take()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.peeked = None;
        self.shared.canceled.store(true, Ordering::Release);
        self.shared.buffer.cancel();
        // Busy slots observe the flag themselves.
        for (index, slot) in self.shared.slots.iter().enumerate() {
            if let Ok(mut slot) = slot.try_lock() {
                slot.client.cancel();
                slot.pending.clear();
                self.shared.record(index, &slot.client);
            }
        }
        debug!(
            "{} closed: seen_pages={} seen_rows={}",
            self.shared.name, self.seen_pages, self.seen_rows
        );
        Ok(())
    }
}

impl Drop for ExchangeOperator {
    fn drop(&mut self) {
        if !self.closed {
            let complete = self.shared.buffer.is_complete();
            if !complete {
                debug!(
                    "{} dropped early: seen_pages={} seen_rows={}",
                    self.shared.name, self.seen_pages, self.seen_rows
                );
            }
            let _ = self.close();
        }
    }
}
