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
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::pagewire_logging::{debug, error};

type PoolTask = Box<dyn FnOnce() + Send + 'static>;

pub const DEFAULT_THREAD_NAME_PREFIX: &str = "exchange-poller";

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub submitted: u64,
    pub queued: usize,
    pub inline_runs: u64,
    pub rejected: u64,
    /// `force_submit` calls that found the queue already full.
    pub over_capacity: u64,
    pub completed: u64,
}

/// Fixed set of named poller threads over a bounded task queue.
///
/// `submit` never drops a task: when the queue is full the task runs on the
/// calling thread.
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
    threads: usize,
    #[allow(dead_code)]
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name_prefix: &str, num_threads: usize, queue_capacity: usize) -> Self {
        let inner = Arc::new(WorkerPoolInner::new(queue_capacity));
        let threads = num_threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let inner_clone = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("{name_prefix}-{idx}"))
                .spawn(move || worker_loop(inner_clone))
                .expect("spawn worker pool thread");
            workers.push(handle);
        }
        debug!(
            "worker pool STARTED: prefix={} threads={} queue_capacity={}",
            name_prefix, threads, inner.capacity
        );
        Self {
            inner,
            threads,
            workers,
        }
    }

    /// Enqueues the task, or runs it inline when the queue is full.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(task) = self.try_submit(task) {
            self.inner.inline_runs.fetch_add(1, Ordering::Relaxed);
            task();
        }
    }

    /// Enqueues the task, or hands it back when the queue is full.
    pub fn try_submit<F>(&self, task: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.inner.queue.lock().expect("worker pool queue lock");
        if queue.len() >= self.inner.capacity {
            drop(queue);
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(task);
        }
        queue.push_back(Box::new(task));
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.cv.notify_one();
        Ok(())
    }

    /// Enqueues the task regardless of capacity.
    ///
    /// Callers must bound their own use: exchange sources hand off at most one
    /// task per producer, and only from a caller-run step. `stats().over_capacity`
    /// counts the enqueues that went past the bound.
    pub fn force_submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.inner.queue.lock().expect("worker pool queue lock");
        if queue.len() >= self.inner.capacity {
            self.inner.over_capacity.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(Box::new(task));
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.cv.notify_one();
    }

    /// Whether the current thread is a worker of any pool.
    pub fn is_worker_thread() -> bool {
        IN_WORKER.with(|flag| flag.get())
    }

    pub fn num_threads(&self) -> usize {
        self.threads
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn num_tasks(&self) -> usize {
        let queue = self.inner.queue.lock().expect("worker pool queue lock");
        queue.len()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            queued: self.num_tasks(),
            inline_runs: self.inner.inline_runs.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            over_capacity: self.inner.over_capacity.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers finish what is queued, then exit. Not joined: a worker may be
        // the thread dropping the last handle.
        self.inner.shutdown.store(true, Ordering::Release);
        let _queue = self.inner.queue.lock().expect("worker pool queue lock");
        self.inner.cv.notify_all();
    }
}

struct WorkerPoolInner {
    queue: Mutex<VecDeque<PoolTask>>,
    cv: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
    submitted: AtomicU64,
    inline_runs: AtomicU64,
    rejected: AtomicU64,
    over_capacity: AtomicU64,
    completed: AtomicU64,
}

impl WorkerPoolInner {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            capacity: capacity.max(1),
            shutdown: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            inline_runs: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            over_capacity: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    fn take(&self) -> Option<PoolTask> {
        let mut queue = self.queue.lock().expect("worker pool queue lock");
        loop {
            if let Some(task) = queue.pop_front() {
                return Some(task);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            queue = self.cv.wait(queue).expect("worker pool queue condvar wait");
        }
    }
}

fn worker_loop(inner: Arc<WorkerPoolInner>) {
    IN_WORKER.with(|flag| flag.set(true));
    while let Some(task) = inner.take() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!(
                "worker pool task panicked on thread {}",
                thread::current().name().unwrap_or("unnamed")
            );
        }
        inner.completed.fetch_add(1, Ordering::Relaxed);
    }
}
