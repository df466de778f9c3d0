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
//! Remote exchange layer of a distributed query engine.
//!
//! A `SourceRouter` turns a source descriptor into a `PageStream`: local table scans
//! go to a `DataStreamProvider`, exchanges become an `ExchangeOperator` that polls
//! every upstream producer on a shared worker pool and merges their pages through a
//! bounded `PageBuffer`.

pub mod common;
pub mod connector;
pub mod exec;
pub mod runtime;

// Folder layout mirrors the engine; `pagewire_*` are convenience aliases.
pub use common::app_config as pagewire_config;
pub use common::logging as pagewire_logging;

pub use common::error::{ExchangeError, Result};
pub use common::ids::{OutputId, ProducerId};
pub use exec::page::Page;
pub use exec::pipeline::operator::PageStream;
pub use exec::source::SourceDescriptor;
pub use exec::source_router::SourceRouter;
