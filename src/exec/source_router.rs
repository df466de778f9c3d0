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
//! Chooses the input operator for a source descriptor.

use std::sync::Arc;

use crate::common::config::ExchangeOptions;
use crate::common::error::{ExchangeError, Result};
use crate::connector::DataStreamProvider;
use crate::exec::operators::ExchangeOperator;
use crate::exec::pipeline::operator::PageStream;
use crate::exec::source::{ColumnHandle, SourceDescriptor};
use crate::pagewire_logging::debug;
use crate::runtime::exec_env;
use crate::runtime::page_buffer::PageBuffer;
use crate::runtime::remote_task_client::RemoteTaskClient;
use crate::runtime::task_transport::{HttpTaskTransport, TaskTransport};
use crate::runtime::worker_pool::WorkerPool;

pub struct SourceRouter {
    data_stream_provider: Arc<dyn DataStreamProvider>,
    transport: Arc<dyn TaskTransport>,
    pool: Arc<WorkerPool>,
    options: ExchangeOptions,
}

impl SourceRouter {
    pub fn new(
        data_stream_provider: Arc<dyn DataStreamProvider>,
        transport: Arc<dyn TaskTransport>,
        pool: Arc<WorkerPool>,
        options: ExchangeOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            data_stream_provider,
            transport,
            pool,
            options,
        })
    }

    /// Router whose HTTP transport carries the connect and read timeouts of `options`.
    pub fn with_http_transport(
        data_stream_provider: Arc<dyn DataStreamProvider>,
        pool: Arc<WorkerPool>,
        options: ExchangeOptions,
    ) -> Result<Self> {
        options.validate()?;
        let transport = HttpTaskTransport::new(options.connect_timeout, options.read_timeout)?;
        Self::new(data_stream_provider, Arc::new(transport), pool, options)
    }

    /// Router over the process-wide pool, configured from `[exchange]`.
    pub fn from_exec_env(data_stream_provider: Arc<dyn DataStreamProvider>) -> Result<Self> {
        Self::with_http_transport(
            data_stream_provider,
            exec_env::worker_pool(),
            ExchangeOptions::from_app_config(),
        )
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    /// Builds the input stream for `descriptor`. Issues no remote request.
    ///
    /// Table scans receive `required_columns` as given; exchanges project nothing.
    pub fn route(
        &self,
        descriptor: SourceDescriptor,
        required_columns: &[ColumnHandle],
    ) -> Result<Box<dyn PageStream>> {
        match descriptor {
            SourceDescriptor::TableScan { split, .. } => {
                debug!(
                    "route table scan: provider={} location={} columns={}",
                    self.data_stream_provider.name(),
                    split.location,
                    required_columns.len()
                );
                self.data_stream_provider
                    .create_data_stream(&split, required_columns)
            }
            SourceDescriptor::Exchange {
                output_id,
                remote_producers,
                schema,
            } => {
                let clients: Vec<RemoteTaskClient> = remote_producers
                    .into_iter()
                    .map(|p| {
                        RemoteTaskClient::new(
                            p.producer_id,
                            p.location,
                            output_id.clone(),
                            schema.clone(),
                            Arc::clone(&self.transport),
                            self.options.retry.clone(),
                        )
                    })
                    .collect();
                debug!(
                    "route exchange: output={} producers={} page_buffer_max={}",
                    output_id,
                    clients.len(),
                    self.options.page_buffer_max
                );
                let buffer = Arc::new(PageBuffer::new(
                    self.options.page_buffer_max,
                    self.options.failure_policy,
                ));
                let op = ExchangeOperator::new(output_id, clients, buffer, Arc::clone(&self.pool))?;
                Ok(Box::new(op))
            }
            SourceDescriptor::Unrecognized => Err(ExchangeError::UnsupportedSourceKind(
                "unrecognized source descriptor kind".to_string(),
            )),
        }
    }
}
