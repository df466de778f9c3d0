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
use thiserror::Error;

use crate::common::ids::ProducerId;

pub type Result<T, E = ExchangeError> = std::result::Result<T, E>;

/// Errors surfaced by source routing and the remote exchange.
///
/// Values are cloneable because one source failure is handed to every waiter
/// of the page buffer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("unsupported source kind: {0}")]
    UnsupportedSourceKind(String),

    #[error("invalid source descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("transient failure fetching from producer {producer} after {attempts} attempt(s): {message}")]
    RemoteTransientFailure {
        producer: ProducerId,
        attempts: u32,
        message: String,
    },

    #[error("remote task {producer} failed: {message}")]
    RemoteTaskFailed { producer: ProducerId, message: String },

    #[error("exchange source {producer} failed: {cause}")]
    BufferPropagatedFailure {
        producer: ProducerId,
        cause: Box<ExchangeError>,
    },

    #[error("exchange canceled")]
    Canceled,

    #[error("task status codec error: {0}")]
    Codec(String),

    #[error("local data stream error: {0}")]
    Local(String),

    #[error("invalid exchange config: {0}")]
    Config(String),
}

impl ExchangeError {
    /// Unwraps buffer propagation down to the failure reported by the source.
    pub fn root_cause(&self) -> &ExchangeError {
        match self {
            ExchangeError::BufferPropagatedFailure { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Producer the failure is attributed to, if any.
    pub fn producer(&self) -> Option<&ProducerId> {
        match self {
            ExchangeError::RemoteTransientFailure { producer, .. }
            | ExchangeError::RemoteTaskFailed { producer, .. }
            | ExchangeError::BufferPropagatedFailure { producer, .. } => Some(producer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExchangeError;
    use crate::common::ids::ProducerId;

    #[test]
    fn root_cause_unwraps_nested_propagation() {
        let cause = ExchangeError::RemoteTaskFailed {
            producer: ProducerId::from("p1"),
            message: "disk full".to_string(),
        };
        let err = ExchangeError::BufferPropagatedFailure {
            producer: ProducerId::from("p1"),
            cause: Box::new(cause.clone()),
        };
        assert_eq!(err.root_cause(), &cause);
        assert_eq!(err.producer().map(|p| p.as_str()), Some("p1"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn canceled_has_no_producer() {
        assert_eq!(ExchangeError::Canceled.root_cause(), &ExchangeError::Canceled);
        assert!(ExchangeError::Canceled.producer().is_none());
    }
}
