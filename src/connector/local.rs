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
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use arrow::ipc::reader::FileReader;

use crate::common::error::{ExchangeError, Result};
use crate::common::types::ColumnType;
use crate::connector::DataStreamProvider;
use crate::exec::page::Page;
use crate::exec::pipeline::operator::PageStream;
use crate::exec::source::{ColumnHandle, Split};
use crate::pagewire_logging::debug;

/// Reads Arrow IPC files named by the split location.
#[derive(Clone, Debug, Default)]
pub struct LocalIpcFileProvider;

impl LocalIpcFileProvider {
    pub fn new() -> Self {
        Self
    }
}

fn split_path(split: &Split) -> Result<PathBuf> {
    let raw = split.location.trim();
    let raw = raw.strip_prefix("file://").unwrap_or(raw);
    if raw.is_empty() {
        return Err(ExchangeError::Local("split location is empty".to_string()));
    }
    Ok(Path::new(raw).to_path_buf())
}

/// Column indexes for the required columns; `None` keeps every column.
fn projection_for(
    schema: &arrow::datatypes::Schema,
    required_columns: &[ColumnHandle],
) -> Result<Option<Vec<usize>>> {
    if required_columns.is_empty() {
        return Ok(None);
    }
    let mut projection = Vec::with_capacity(required_columns.len());
    for column in required_columns {
        let (idx, field) = schema.column_with_name(&column.name).ok_or_else(|| {
            ExchangeError::Local(format!("column {} not found in file", column.name))
        })?;
        match ColumnType::from_arrow(field.data_type()) {
            Some(actual) if actual == column.column_type => projection.push(idx),
            _ => {
                return Err(ExchangeError::Local(format!(
                    "column {} has type {:?}, required {}",
                    column.name,
                    field.data_type(),
                    column.column_type
                )));
            }
        }
    }
    Ok(Some(projection))
}

impl DataStreamProvider for LocalIpcFileProvider {
    fn name(&self) -> &'static str {
        "local_ipc"
    }

    fn create_data_stream(
        &self,
        split: &Split,
        required_columns: &[ColumnHandle],
    ) -> Result<Box<dyn PageStream>> {
        let path = split_path(split)?;
        let file = File::open(&path)
            .map_err(|e| ExchangeError::Local(format!("open {}: {e}", path.display())))?;
        let reader = FileReader::try_new(BufReader::new(file), None).map_err(|e| {
            ExchangeError::Local(format!("read Arrow IPC file {}: {e}", path.display()))
        })?;
        let projection = projection_for(reader.schema().as_ref(), required_columns)?;
        debug!(
            "local scan OPEN: path={} batches={} projection={:?}",
            path.display(),
            reader.num_batches(),
            projection
        );
        Ok(Box::new(LocalIpcStream {
            name: format!("LOCAL_IPC_SCAN ({})", path.display()),
            reader,
            projection,
            peeked: None,
            done: false,
        }))
    }
}

struct LocalIpcStream {
    name: String,
    reader: FileReader<BufReader<File>>,
    projection: Option<Vec<usize>>,
    peeked: Option<Page>,
    done: bool,
}

impl LocalIpcStream {
    fn read_next(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }
        let Some(batch) = self.reader.next() else {
            self.done = true;
            return Ok(None);
        };
        let batch = batch.map_err(|e| ExchangeError::Local(format!("{}: {e}", self.name)))?;
        let batch = match self.projection.as_ref() {
            Some(indices) => batch
                .project(indices)
                .map_err(|e| ExchangeError::Local(format!("{}: {e}", self.name)))?,
            None => batch,
        };
        Ok(Some(Page::new(batch)))
    }
}

impl PageStream for LocalIpcStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_next()?;
        }
        Ok(self.peeked.is_some())
    }

    fn next_page(&mut self) -> Result<Option<Page>> {
        if let Some(page) = self.peeked.take() {
            return Ok(Some(page));
        }
        self.read_next()
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.peeked = None;
        Ok(())
    }
}
