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

//! Chunked parallel HTTP/HTTPS download engine.
//!
//! A [`Download`] probes the origin for its size and byte-range support,
//! splits the resource into chunks, fetches them concurrently under a bounded
//! gate and writes each chunk straight into its place in a preallocated
//! destination file.

mod assembler;
mod chunk_downloader;
mod config;
mod download;
mod downloader;
mod error;
mod parallel_manager;
mod planner;
mod prober;
mod progress;
mod request;
mod single_downloader;
mod types;

pub use assembler::{Artifact, ByteSink, OffsetWriter, StreamWriter, remove_artifact};
pub use chunk_downloader::ChunkFetcher;
pub use config::{DEFAULT_USER_AGENT, DownloaderConfig};
pub use download::Download;
pub use downloader::Downloader;
pub use error::{DownloadError, ErrorKind};
pub use planner::{SizingParams, default_concurrency, plan_chunks};
pub use prober::{PROBE_RANGE, parse_content_disposition, parse_content_range_total};
pub use progress::{ProgressCallback, ProgressReporter, ProgressState};
pub use request::RequestTemplate;
pub use reqwest::Url;
pub use types::{
    Chunk, ChunkState, ChunkStatus, DEFAULT_PROGRESS_INTERVAL, DownloadPhase, DownloadResult,
    DownloadSpec, RemoteInfo,
};
