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

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use bon::Builder;
use jiff::Span;
use strum_macros::{Display, EnumIter};

/// Default interval between two progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(20);

/// A request to download one resource, immutable once the download starts
#[derive(Debug, Clone, Builder)]
pub struct DownloadSpec {
    /// URL to download from
    #[builder(into)]
    pub url:               String,
    /// Path where the downloaded file should be saved
    #[builder(into)]
    pub output_path:       PathBuf,
    /// Explicit chunk size in bytes; derived from the resource size if unset
    pub chunk_size:        Option<u64>,
    /// Lower bound for a derived chunk size
    pub min_chunk_size:    Option<u64>,
    /// Upper bound for a derived chunk size
    pub max_chunk_size:    Option<u64>,
    /// Maximum number of chunk fetches in flight
    pub concurrency:       Option<usize>,
    /// Extra request headers sent with every request
    #[builder(default)]
    pub headers:           Vec<(String, String)>,
    /// Interval between progress callbacks
    #[builder(default = DEFAULT_PROGRESS_INTERVAL)]
    pub progress_interval: Duration,
}

/// What the origin server told us about the resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Total length in bytes, 0 when unknown
    pub total_size: u64,
    /// Whether the server honors byte-range requests
    pub rangeable:  bool,
    /// Whether the request ended on a different URL
    pub redirected: bool,
    /// Filename suggested by `Content-Disposition`, if any
    pub file_name:  Option<String>,
}

/// A contiguous byte range of the resource, fetched independently.
///
/// `end` is inclusive. The terminal chunk has no `end` and is requested as
/// `bytes=<start>-` so the server returns whatever remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end:   Option<u64>,
}

impl Chunk {
    /// Number of bytes covered, `None` for the open-ended terminal chunk.
    #[must_use]
    pub fn len(&self) -> Option<u64> { self.end.map(|end| end - self.start + 1) }

    #[must_use]
    pub const fn is_open(&self) -> bool { self.end.is_none() }

    /// Value of the `Range` request header for this chunk.
    #[must_use]
    pub fn range_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Status of a chunk fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum ChunkStatus {
    /// Planned but not started
    Planned,
    /// A fetcher is streaming this chunk
    InFlight,
    /// Every byte of the chunk reached the artifact
    Done,
    /// The fetch failed
    Failed,
}

impl ChunkStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::InFlight,
            2 => Self::Done,
            3 => Self::Failed,
            _ => Self::Planned,
        }
    }
}

/// Snapshot of a chunk and its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkState {
    pub chunk:  Chunk,
    pub status: ChunkStatus,
}

/// Chunk plan written once during planning.
///
/// Each fetcher only updates the status slot of the chunk it owns.
#[derive(Debug, Default)]
pub(crate) struct ChunkBoard {
    chunks:   Vec<Chunk>,
    statuses: Vec<AtomicU8>,
}

impl ChunkBoard {
    pub(crate) fn new(chunks: Vec<Chunk>) -> Self {
        let statuses = chunks
            .iter()
            .map(|_| AtomicU8::new(ChunkStatus::Planned as u8))
            .collect();
        Self { chunks, statuses }
    }

    pub(crate) fn chunks(&self) -> &[Chunk] { &self.chunks }

    pub(crate) fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub(crate) fn mark(&self, index: usize, status: ChunkStatus) {
        if let Some(slot) = self.statuses.get(index) {
            slot.store(status as u8, Ordering::Release);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ChunkState> {
        self.chunks
            .iter()
            .zip(&self.statuses)
            .map(|(chunk, status)| ChunkState {
                chunk:  *chunk,
                status: ChunkStatus::from_u8(status.load(Ordering::Acquire)),
            })
            .collect()
    }
}

/// Lifecycle of a [`Download`](crate::Download)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DownloadPhase {
    Created,
    Planning,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadPhase {
    /// Terminal phases cannot be left; a new download must be constructed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Path where the file was saved
    pub path:      PathBuf,
    /// Bytes written to the destination
    pub size:      u64,
    /// Number of chunks fetched, 0 for a single-stream download
    pub chunks:    usize,
    /// Whether the resource was fetched with range requests
    pub rangeable: bool,
    /// Duration of the run phase
    pub duration:  Span,
}
