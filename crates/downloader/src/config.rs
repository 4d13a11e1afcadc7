// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use jiff::SignedDuration;
use smart_default::SmartDefault;
use snafu::ResultExt;

use crate::error::{DownloadError, TransportSnafu};

/// User-Agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("parfetch/", env!("CARGO_PKG_VERSION"));

/// Transport configuration shared by every download made with one client
#[derive(Debug, Clone, SmartDefault)]
pub struct DownloaderConfig {
    /// Timeout for the whole request including the body (default: none)
    pub timeout: Option<SignedDuration>,

    /// Timeout between two reads of a response body (default: 30s)
    #[default(Some(SignedDuration::from_secs(30)))]
    pub read_timeout: Option<SignedDuration>,

    /// Timeout for connect and TLS handshake (default: 10s)
    #[default(Some(SignedDuration::from_secs(10)))]
    pub connect_timeout: Option<SignedDuration>,

    /// User-Agent header
    #[default(DEFAULT_USER_AGENT.to_string())]
    pub user_agent: String,

    /// Maximum number of redirects followed per request
    #[default = 10]
    pub max_redirects: usize,
}

impl DownloaderConfig {
    /// Build the HTTP client described by this configuration
    pub fn build_client(&self) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects));

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(to_std("timeout", timeout)?);
        }
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(to_std("read_timeout", timeout)?);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(to_std("connect_timeout", timeout)?);
        }

        builder.build().context(TransportSnafu)
    }
}

fn to_std(name: &str, duration: SignedDuration) -> Result<std::time::Duration, DownloadError> {
    std::time::Duration::try_from(duration).map_err(|_| DownloadError::Planning {
        message: format!("{name} must be non-negative, got {duration}"),
    })
}
