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
use std::time::Duration;

use crate::common::app_config::ExchangeConfig;
use crate::common::error::{ExchangeError, Result};
use crate::pagewire_config::config as pagewire_app_config;
use crate::runtime::page_buffer::FailurePolicy;
use crate::runtime::remote_task_client::RetryPolicy;

pub(crate) fn exchange_worker_threads() -> usize {
    pagewire_app_config()
        .ok()
        .map(|c| c.exchange.actual_worker_threads())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn exchange_worker_queue_capacity() -> usize {
    pagewire_app_config()
        .ok()
        .map(|c| c.exchange.actual_worker_queue_capacity())
        .unwrap_or_else(exchange_worker_threads)
}

/// Construction-time parameters of an exchange source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub page_buffer_max: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub retry: RetryPolicy,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self::from_config(&ExchangeConfig::default())
    }
}

impl ExchangeOptions {
    pub fn from_config(cfg: &ExchangeConfig) -> Self {
        Self {
            page_buffer_max: cfg.page_buffer_max,
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            failure_policy: cfg.failure_policy,
            retry: RetryPolicy {
                max_transient_retries: cfg.max_transient_retries,
                base_backoff: Duration::from_millis(cfg.retry_base_backoff_ms),
                max_backoff: Duration::from_millis(cfg.retry_max_backoff_ms),
                empty_poll_delay: Duration::from_millis(cfg.empty_poll_delay_ms),
            },
        }
    }

    /// Options from the process config, or defaults when no config file exists.
    pub fn from_app_config() -> Self {
        pagewire_app_config()
            .ok()
            .map(|c| Self::from_config(&c.exchange))
            .unwrap_or_default()
    }

    pub fn with_page_buffer_max(mut self, page_buffer_max: usize) -> Self {
        self.page_buffer_max = page_buffer_max;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_buffer_max == 0 {
            return Err(ExchangeError::Config(
                "page_buffer_max must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ExchangeError::Config(
                "connect and read timeouts must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(ExchangeError::Config(format!(
                "retry base backoff {:?} exceeds max backoff {:?}",
                self.retry.base_backoff, self.retry.max_backoff
            )));
        }
        Ok(())
    }
}
