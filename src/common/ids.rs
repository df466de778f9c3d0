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
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one remote producer (an upstream task) inside an exchange source.
///
/// The planner assigns these; the exchange layer only requires them to be unique
/// within a single exchange source.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(String);

impl ProducerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProducerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Output buffer id on the producer side that an exchange source reads from.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(String);

impl OutputId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OutputId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputId, ProducerId};

    #[test]
    fn producer_id_serializes_as_plain_string() {
        let id = ProducerId::new("stage1.task0");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"stage1.task0\"");
        let back: ProducerId = serde_json::from_str("\"stage1.task0\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn output_id_display_is_raw_value() {
        assert_eq!(OutputId::from("out-0").to_string(), "out-0");
    }
}
