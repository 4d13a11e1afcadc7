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

use tokio_util::sync::CancellationToken;

use crate::{
    config::DownloaderConfig,
    download::Download,
    error::DownloadError,
    types::{DownloadResult, DownloadSpec},
};

/// Entry point owning the HTTP client shared by many downloads.
///
/// Components used per download:
/// - `CapabilityProber`: learns size and range support
/// - `plan_chunks`: splits the resource into byte ranges
/// - `ParallelDownloadManager`: fetches chunks under a concurrency gate
/// - `SingleThreadDownloader`: fetches unsplittable resources as one stream
/// - `Artifact`: positional writes into the preallocated destination
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloaderConfig,
    client: reqwest::Client,
}

impl Downloader {
    /// Create a downloader, building its HTTP client from `config`.
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = config.build_client()?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub const fn config(&self) -> &DownloaderConfig { &self.config }

    /// Client used for every request, for callers that issue their own
    /// metadata requests.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client { &self.client }

    /// Construct and plan a download without running it, so the caller can
    /// inspect [`Download::info`] or subscribe to progress first.
    pub async fn prepare(
        &self,
        spec: DownloadSpec,
        cancel: CancellationToken,
    ) -> Result<Download, DownloadError> {
        let mut download = Download::new(self.client.clone(), spec, cancel)?;
        download.plan().await?;
        Ok(download)
    }

    /// Plan and run a download in one go.
    pub async fn download(
        &self,
        spec: DownloadSpec,
        cancel: CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let mut download = self.prepare(spec, cancel).await?;
        download.run().await
    }
}
