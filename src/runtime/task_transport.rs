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

use thiserror::Error;
use url::Url;

use crate::common::error::{ExchangeError, Result};
use crate::common::ids::OutputId;
use crate::pagewire_logging::debug;

/// One results request: `GET {location}/results/{output_id}/{token}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRequest {
    pub location: Url,
    pub output_id: OutputId,
    pub token: u64,
}

impl TaskRequest {
    pub fn results_url(&self) -> Result<Url, TransportError> {
        let mut url = self.location.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.location.to_string()))?
            .pop_if_empty()
            .push("results")
            .push(self.output_id.as_str())
            .push(&self.token.to_string());
        Ok(url)
    }
}

/// Failures below the envelope level. All of them are transient for the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} timed out: {message}")]
    Timeout { url: String, message: String },

    #[error("cannot connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Io { url: String, message: String },

    #[error("location {0} cannot carry a results path")]
    InvalidUrl(String),
}

/// Carries results requests to remote producers.
pub trait TaskTransport: Send + Sync {
    /// Issues exactly one request and returns the raw envelope bytes.
    fn fetch_results(&self, request: &TaskRequest) -> Result<Vec<u8>, TransportError>;
}

/// Blocking HTTP transport with connect and per-request timeouts.
pub struct HttpTaskTransport {
    client: reqwest::blocking::Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpTaskTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| ExchangeError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            connect_timeout,
            read_timeout,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

fn classify(url: &Url, err: reqwest::Error) -> TransportError {
    let url = url.to_string();
    let message = err.to_string();
    if err.is_timeout() {
        TransportError::Timeout { url, message }
    } else if err.is_connect() {
        TransportError::Connect { url, message }
    } else {
        TransportError::Io { url, message }
    }
}

impl TaskTransport for HttpTaskTransport {
    fn fetch_results(&self, request: &TaskRequest) -> Result<Vec<u8>, TransportError> {
        let url = request.results_url()?;
        debug!("exchange GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|e| classify(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().map_err(|e| classify(&url, e))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_url_appends_segments() {
        let request = TaskRequest {
            location: Url::parse("http://worker-1:8080/v1/task/t7").unwrap(),
            output_id: OutputId::from("out-0"),
            token: 12,
        };
        assert_eq!(
            request.results_url().unwrap().as_str(),
            "http://worker-1:8080/v1/task/t7/results/out-0/12"
        );
    }

    #[test]
    fn results_url_tolerates_trailing_slash() {
        let request = TaskRequest {
            location: Url::parse("http://worker-1:8080/task/").unwrap(),
            output_id: OutputId::from("o"),
            token: 0,
        };
        assert_eq!(
            request.results_url().unwrap().as_str(),
            "http://worker-1:8080/task/results/o/0"
        );
    }

    #[test]
    fn opaque_location_is_rejected() {
        let request = TaskRequest {
            location: Url::parse("mailto:someone@example.com").unwrap(),
            output_id: OutputId::from("o"),
            token: 0,
        };
        assert!(matches!(
            request.results_url(),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn transport_keeps_configured_timeouts() {
        let transport =
            HttpTaskTransport::new(Duration::from_millis(250), Duration::from_millis(750)).unwrap();
        assert_eq!(transport.connect_timeout(), Duration::from_millis(250));
        assert_eq!(transport.read_timeout(), Duration::from_millis(750));
    }
}
