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
//! Process-wide execution resources shared by every exchange source.

use std::sync::{Arc, OnceLock};

use crate::common::config::{exchange_worker_queue_capacity, exchange_worker_threads};
use crate::runtime::worker_pool::{DEFAULT_THREAD_NAME_PREFIX, WorkerPool};

static WORKER_POOL: OnceLock<Arc<WorkerPool>> = OnceLock::new();

/// The shared poller pool, sized from `[exchange]` config on first use.
pub fn worker_pool() -> Arc<WorkerPool> {
    Arc::clone(WORKER_POOL.get_or_init(|| {
        Arc::new(WorkerPool::new(
            DEFAULT_THREAD_NAME_PREFIX,
            exchange_worker_threads(),
            exchange_worker_queue_capacity(),
        ))
    }))
}
