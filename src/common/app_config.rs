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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::runtime::page_buffer::FailurePolicy;

static CONFIG: OnceLock<PageWireConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static PageWireConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = PageWireConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static PageWireConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = PageWireConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static PageWireConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("PAGEWIRE_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("pagewire.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $PAGEWIRE_CONFIG or create ./pagewire.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct PageWireConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "pagewire=debug,reqwest=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub exchange: ExchangeConfig,
}

impl PageWireConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: PageWireConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Filter expression handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for PageWireConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            exchange: ExchangeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_page_buffer_max")]
    pub page_buffer_max: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_retry_base_backoff_ms")]
    pub retry_base_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default = "default_empty_poll_delay_ms")]
    pub empty_poll_delay_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_page_buffer_max() -> usize {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_worker_threads() -> usize {
    0 // 0 means use CPU cores
}

fn default_worker_queue_capacity() -> usize {
    0 // 0 means one queued task per worker thread
}

fn default_max_transient_retries() -> u32 {
    5
}

fn default_retry_base_backoff_ms() -> u64 {
    100
}

fn default_retry_max_backoff_ms() -> u64 {
    2_000
}

fn default_empty_poll_delay_ms() -> u64 {
    50
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            page_buffer_max: default_page_buffer_max(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            worker_threads: default_worker_threads(),
            worker_queue_capacity: default_worker_queue_capacity(),
            max_transient_retries: default_max_transient_retries(),
            retry_base_backoff_ms: default_retry_base_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            empty_poll_delay_ms: default_empty_poll_delay_ms(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl ExchangeConfig {
    /// Get the actual number of poller threads.
    /// Returns CPU cores if configured as 0.
    pub fn actual_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Get the actual bounded queue capacity of the poller pool.
    /// Returns the thread count if configured as 0.
    pub fn actual_worker_queue_capacity(&self) -> usize {
        if self.worker_queue_capacity > 0 {
            self.worker_queue_capacity
        } else {
            self.actual_worker_threads()
        }
    }
}
