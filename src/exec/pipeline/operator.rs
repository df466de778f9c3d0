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
//! Pull-based page stream contract consumed by the local pipeline.
//!
//! Responsibilities:
//! - Defines `PageStream`, the input operator shape shared by local scans and exchanges.
//! - Provides an iterator adapter so drivers can drain a stream with `for` loops.
//!
//! Key exported interfaces:
//! - Types: `PageStream`, `VecPageStream`, `PageStreamIter`.
//!
//! Current limitations:
//! - Streams are blocking; a consumer that must not block has to run them on its own thread.

use std::collections::VecDeque;

use crate::common::error::Result;
use crate::exec::page::Page;
use crate::pagewire_logging::debug;

/// Input operator yielding pages until end-of-stream.
pub trait PageStream: Send {
    fn name(&self) -> &str;

    /// Blocks until a page is available (`true`) or the stream ended (`false`).
    fn has_next(&mut self) -> Result<bool>;

    /// Blocks for the next page. `Ok(None)` is end-of-stream.
    fn next_page(&mut self) -> Result<Option<Page>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: PageStream + ?Sized> PageStream for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn next_page(&mut self) -> Result<Option<Page>> {
        (**self).next_page()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Stream over pages already in memory.
pub struct VecPageStream {
    name: String,
    pages: VecDeque<Page>,
}

impl VecPageStream {
    pub fn new(name: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            name: name.into(),
            pages: pages.into(),
        }
    }
}

impl PageStream for VecPageStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.pages.is_empty())
    }

    fn next_page(&mut self) -> Result<Option<Page>> {
        Ok(self.pages.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.pages.clear();
        Ok(())
    }
}

/// Drains a stream as `Result<Page>` items; stops after end-of-stream or the first error.
pub struct PageStreamIter<S: PageStream> {
    stream: S,
    completed: bool,
    errored: bool,
    seen_pages: usize,
    seen_rows: usize,
}

impl<S: PageStream> PageStreamIter<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            completed: false,
            errored: false,
            seen_pages: 0,
            seen_rows: 0,
        }
    }

    pub fn seen_pages(&self) -> usize {
        self.seen_pages
    }

    pub fn seen_rows(&self) -> usize {
        self.seen_rows
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: PageStream> Iterator for PageStreamIter<S> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.completed || self.errored {
            return None;
        }
        match self.stream.next_page() {
            Ok(Some(page)) => {
                self.seen_pages = self.seen_pages.saturating_add(1);
                self.seen_rows = self.seen_rows.saturating_add(page.num_rows());
                Some(Ok(page))
            }
            Ok(None) => {
                self.completed = true;
                debug!(
                    "{} completed: pages={} rows={}",
                    self.stream.name(),
                    self.seen_pages,
                    self.seen_rows
                );
                None
            }
            Err(e) => {
                self.errored = true;
                Some(Err(e))
            }
        }
    }
}
