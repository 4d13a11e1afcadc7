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

use std::path::PathBuf;

use snafu::Snafu;
use strum_macros::Display;

use crate::types::DownloadPhase;

/// Coarse classification of a [`DownloadError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Metadata or capability retrieval failed.
    Probe,
    /// Sizing parameters or request inputs are invalid.
    Planning,
    /// The server ignored or mishandled a `Range` header.
    RangeMismatch,
    /// Connection, protocol or HTTP status failure while fetching.
    Transport,
    /// The caller aborted the operation.
    Cancelled,
    /// Local file creation, preallocation or write failed.
    Artifact,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Probe failed with HTTP {status} for URL: {url}"))]
    Probe { status: u16, url: String },

    #[snafu(display("Invalid download parameters: {message}"))]
    Planning { message: String },

    #[snafu(display("Cannot {action} a download in phase {phase}"))]
    InvalidPhase {
        action: &'static str,
        phase:  DownloadPhase,
    },

    #[snafu(display(
        "Server answered range {range} with HTTP {status} and {actual} bytes, expected {expected}"
    ))]
    RangeMismatch {
        range:    String,
        status:   u16,
        expected: u64,
        actual:   u64,
    },

    #[snafu(display("Network error: {source}"))]
    Transport { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    Http { status: u16, url: String },

    #[snafu(display("Download of {url} was cancelled"))]
    Cancelled { url: String },

    #[snafu(display("Artifact error at {}: {source}", path.display()))]
    Artifact {
        path:   PathBuf,
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Probe { .. } => ErrorKind::Probe,
            Self::Planning { .. } | Self::InvalidPhase { .. } => ErrorKind::Planning,
            Self::RangeMismatch { .. } => ErrorKind::RangeMismatch,
            Self::Transport { .. } | Self::Http { .. } => ErrorKind::Transport,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Artifact { .. } => ErrorKind::Artifact,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled { .. }) }
}
