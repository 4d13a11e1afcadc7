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

use std::{sync::Arc, time::Duration};

use jiff::Timestamp;
use snafu::ensure;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    assembler::{Artifact, remove_artifact},
    chunk_downloader::ChunkFetcher,
    error::{CancelledSnafu, DownloadError, InvalidPhaseSnafu},
    parallel_manager::ParallelDownloadManager,
    planner::{SizingParams, plan_chunks},
    prober::{CapabilityProber, Prefetched},
    progress::{ProgressCallback, ProgressReporter, ProgressState, spawn_progress_loop},
    request::RequestTemplate,
    single_downloader::SingleThreadDownloader,
    types::{ChunkBoard, ChunkState, DownloadPhase, DownloadResult, DownloadSpec, RemoteInfo},
};

/// One download of one resource: probe and plan, then fetch and assemble.
///
/// A `Download` moves through [`DownloadPhase`] exactly once. After a
/// terminal phase a new `Download` must be constructed to try again.
///
/// ```no_run
/// # async fn example() -> Result<(), parfetch_downloader::DownloadError> {
/// use parfetch_downloader::{Download, DownloadSpec, DownloaderConfig};
/// use tokio_util::sync::CancellationToken;
///
/// let client = DownloaderConfig::default().build_client()?;
/// let spec = DownloadSpec::builder()
///     .url("https://example.com/big.iso")
///     .output_path("big.iso")
///     .build();
///
/// let mut download = Download::new(client, spec, CancellationToken::new())?;
/// download.on_progress(|size, total, _| println!("{size}/{total}"));
/// download.plan().await?;
/// let result = download.run().await?;
/// println!("saved {} bytes", result.size);
/// # Ok(())
/// # }
/// ```
pub struct Download {
    spec:        DownloadSpec,
    sizing:      SizingParams,
    concurrency: usize,
    fetcher:     ChunkFetcher,
    progress:    Arc<ProgressState>,
    cancel:      CancellationToken,
    phase:       DownloadPhase,
    info:        RemoteInfo,
    prefetched:  Prefetched,
    board:       Arc<ChunkBoard>,
    callback:    Option<ProgressCallback>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("url", &self.spec.url)
            .field("output_path", &self.spec.output_path)
            .field("phase", &self.phase)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// Validate `spec` and set up a download in [`DownloadPhase::Created`].
    ///
    /// `cancel` aborts probing, fetching and progress reporting when fired.
    pub fn new(
        client: reqwest::Client,
        spec: DownloadSpec,
        cancel: CancellationToken,
    ) -> Result<Self, DownloadError> {
        let request = RequestTemplate::new(&spec.url, &spec.headers)?;
        let sizing = SizingParams::from(&spec);
        sizing.validate()?;

        let progress = Arc::new(ProgressState::default());
        let fetcher = ChunkFetcher::new(
            client,
            Arc::new(request),
            Arc::clone(&progress),
            cancel.clone(),
        );

        Ok(Self {
            concurrency: sizing.resolve_concurrency(),
            sizing,
            spec,
            fetcher,
            progress,
            cancel,
            phase: DownloadPhase::Created,
            info: RemoteInfo::default(),
            prefetched: Prefetched::Nothing,
            board: Arc::new(ChunkBoard::default()),
            callback: None,
        })
    }

    /// Subscribe to progress, called every `progress_interval` while running
    /// and once more after success.
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: Fn(u64, u64, Duration) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Probe the server and split the resource into chunks.
    #[tracing::instrument(skip(self), fields(url = %self.spec.url))]
    pub async fn plan(&mut self) -> Result<&RemoteInfo, DownloadError> {
        self.enter(DownloadPhase::Created, DownloadPhase::Planning, "plan")?;

        match self.plan_inner().await {
            Ok(()) => {
                self.phase = DownloadPhase::Ready;
                Ok(&self.info)
            }
            Err(error) => {
                if self.prefetched != Prefetched::Nothing {
                    self.discard_artifact().await;
                }
                Err(self.fail(error))
            }
        }
    }

    async fn plan_inner(&mut self) -> Result<(), DownloadError> {
        let outcome = CapabilityProber::new(&self.fetcher, &self.spec.output_path)
            .probe()
            .await?;
        self.prefetched = outcome.prefetched;
        self.info = outcome.info;
        self.progress.set_total(self.info.total_size);

        let chunks = match self.prefetched {
            Prefetched::Complete(_) => Vec::new(),
            _ => plan_chunks(self.info.total_size, self.info.rangeable, &self.sizing)?,
        };
        info!(
            total_size = self.info.total_size,
            rangeable = self.info.rangeable,
            redirected = self.info.redirected,
            chunks = chunks.len(),
            "download planned"
        );
        self.board = Arc::new(ChunkBoard::new(chunks));
        Ok(())
    }

    /// Fetch and assemble the resource. On failure or cancellation the
    /// destination file is removed.
    #[tracing::instrument(skip(self), fields(url = %self.spec.url))]
    pub async fn run(&mut self) -> Result<DownloadResult, DownloadError> {
        self.enter(DownloadPhase::Ready, DownloadPhase::Running, "run")?;
        let started = Timestamp::now();

        let stop = self.cancel.child_token();
        let reporter = self.callback.clone().map(|callback| {
            spawn_progress_loop(
                Arc::clone(&self.progress),
                callback,
                self.spec.progress_interval,
                stop.clone(),
            )
        });

        let result = self.run_inner().await;

        stop.cancel();
        if let Some(reporter) = reporter {
            if let Err(error) = reporter.await {
                warn!(%error, "progress reporter ended abnormally");
            }
        }

        match result {
            Ok(size) => {
                if let Some(callback) = &self.callback {
                    callback(self.size(), self.total_size(), self.elapsed());
                }
                self.phase = DownloadPhase::Completed;
                info!(size, path = %self.spec.output_path.display(), "download completed");
                Ok(DownloadResult {
                    path: self.spec.output_path.clone(),
                    size,
                    chunks: self.board.chunks().len(),
                    rangeable: self.info.rangeable,
                    duration: started.until(Timestamp::now()).unwrap_or_default(),
                })
            }
            Err(error) => {
                self.discard_artifact().await;
                Err(self.fail(error))
            }
        }
    }

    async fn run_inner(&self) -> Result<u64, DownloadError> {
        ensure!(
            !self.cancel.is_cancelled(),
            CancelledSnafu {
                url: self.spec.url.as_str(),
            }
        );

        let uncounted = match self.prefetched {
            Prefetched::Complete(written) => return Ok(written),
            Prefetched::Head(written) => written,
            Prefetched::Nothing => 0,
        };

        if self.board.is_empty() {
            return SingleThreadDownloader::new(&self.fetcher)
                .download(&self.spec.output_path, uncounted)
                .await;
        }

        let artifact = Artifact::preallocate(&self.spec.output_path, self.info.total_size).await?;
        let written = ParallelDownloadManager::new(
            self.fetcher.clone(),
            Arc::clone(&self.board),
            self.concurrency,
        )
        .download_all(&artifact, self.info.total_size, uncounted)
        .await?;
        artifact.sync().await?;
        Ok(written)
    }

    fn enter(
        &mut self,
        expected: DownloadPhase,
        next: DownloadPhase,
        action: &'static str,
    ) -> Result<(), DownloadError> {
        ensure!(
            self.phase == expected,
            InvalidPhaseSnafu {
                action,
                phase: self.phase,
            }
        );
        self.phase = next;
        Ok(())
    }

    /// Move to the matching terminal phase, reporting a fired token as
    /// cancellation whatever error it surfaced as.
    fn fail(&mut self, error: DownloadError) -> DownloadError {
        let error = if self.cancel.is_cancelled() && !error.is_cancelled() {
            CancelledSnafu {
                url: self.spec.url.as_str(),
            }
            .build()
        } else {
            error
        };

        self.phase = if error.is_cancelled() {
            DownloadPhase::Cancelled
        } else {
            DownloadPhase::Failed
        };
        warn!(%error, phase = %self.phase, "download stopped");
        error
    }

    async fn discard_artifact(&self) {
        if let Err(error) = remove_artifact(&self.spec.output_path).await {
            warn!(%error, "failed to remove partial download");
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &DownloadSpec { &self.spec }

    /// What the probe learned, default until planned.
    #[must_use]
    pub const fn info(&self) -> &RemoteInfo { &self.info }

    #[must_use]
    pub const fn phase(&self) -> DownloadPhase { self.phase }

    /// Expected total, corrected once the transfer shows the real length.
    #[must_use]
    pub fn total_size(&self) -> u64 { self.progress.total_size() }

    #[must_use]
    pub const fn is_rangeable(&self) -> bool { self.info.rangeable }

    #[must_use]
    pub const fn is_redirected(&self) -> bool { self.info.redirected }

    /// Resolved concurrency bound.
    #[must_use]
    pub const fn concurrency(&self) -> usize { self.concurrency }

    /// Planned chunks with their current status.
    #[must_use]
    pub fn chunks(&self) -> Vec<ChunkState> { self.board.snapshot() }

    /// Shared progress counter, readable from other tasks while running.
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressState> { Arc::clone(&self.progress) }

    #[must_use]
    pub fn size(&self) -> u64 { self.progress.size() }

    #[must_use]
    pub fn speed(&self) -> u64 { self.progress.speed() }

    #[must_use]
    pub fn avg_speed(&self) -> u64 { self.progress.avg_speed() }

    #[must_use]
    pub fn elapsed(&self) -> Duration { self.progress.elapsed() }
}
