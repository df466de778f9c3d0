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
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::common::error::{ExchangeError, Result};
use crate::common::ids::{OutputId, ProducerId};
use crate::common::types::ColumnType;

/// Location of local data plus connector specific properties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub location: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Split {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHandle {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnHandle {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// One upstream task an exchange pulls from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProducer {
    pub producer_id: ProducerId,
    pub location: Url,
}

impl RemoteProducer {
    pub fn new(producer_id: impl Into<ProducerId>, location: Url) -> Self {
        Self {
            producer_id: producer_id.into(),
            location,
        }
    }
}

/// Where an input operator reads from. Encoded as JSON with a `kind` tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    TableScan {
        split: Split,
        #[serde(default)]
        required_columns: Vec<ColumnHandle>,
    },
    Exchange {
        output_id: OutputId,
        /// Iteration order is kept when building clients.
        remote_producers: Vec<RemoteProducer>,
        schema: Vec<ColumnType>,
    },
    /// Any kind this build does not know.
    #[serde(other)]
    Unrecognized,
}

impl SourceDescriptor {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| ExchangeError::InvalidDescriptor(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            ExchangeError::InvalidDescriptor(format!("read {}: {e}", path.display()))
        })?;
        Self::from_json(&s)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::TableScan { .. } => "table_scan",
            SourceDescriptor::Exchange { .. } => "exchange",
            SourceDescriptor::Unrecognized => "unrecognized",
        }
    }

    /// Columns the planner attached to a table scan; empty for other kinds.
    pub fn required_columns(&self) -> &[ColumnHandle] {
        match self {
            SourceDescriptor::TableScan {
                required_columns, ..
            } => required_columns,
            _ => &[],
        }
    }
}
