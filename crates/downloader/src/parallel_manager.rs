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

use std::sync::Arc;

use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    assembler::Artifact,
    chunk_downloader::ChunkFetcher,
    error::DownloadError,
    types::{Chunk, ChunkBoard, ChunkStatus},
};

type Joined = Result<Result<(Chunk, u64), DownloadError>, JoinError>;

/// Fetches every planned chunk into a preallocated artifact, at most
/// `concurrency` at a time.
pub(crate) struct ParallelDownloadManager {
    fetcher:     ChunkFetcher,
    board:       Arc<ChunkBoard>,
    concurrency: usize,
}

impl ParallelDownloadManager {
    pub(crate) const fn new(
        fetcher: ChunkFetcher,
        board: Arc<ChunkBoard>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            board,
            concurrency,
        }
    }

    /// Download all chunks and return the bytes written.
    ///
    /// A chunk is spawned only once it holds a slot, so no more than
    /// `concurrency` workers exist at any time. The first failure stops
    /// admission and cancels the fetches still running. It is returned once
    /// they have wound down.
    ///
    /// `uncounted` leading bytes of chunk 0 were already counted by the probe.
    /// When the open-ended last chunk ends short of `total_size`, the artifact
    /// is trimmed to the bytes actually received.
    pub(crate) async fn download_all(
        &self,
        artifact: &Artifact,
        total_size: u64,
        uncounted: u64,
    ) -> Result<u64, DownloadError> {
        let gate = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let abort = self.fetcher_token();
        let fetcher = self.fetcher.with_cancel(abort.clone());

        info!(
            chunks = self.board.chunks().len(),
            concurrency = self.concurrency,
            "starting chunked download"
        );

        let mut workers = JoinSet::new();
        let mut tally = Tally::default();
        let mut failure = None;

        for chunk in self.board.chunks().iter().copied() {
            // reap finished workers while waiting so a failure stops admission
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = workers.join_next() => {
                        if let Err(error) = tally.settle(joined, &fetcher) {
                            failure = Some(error);
                            break None;
                        }
                    }
                    permit = Arc::clone(&gate).acquire_owned() => {
                        match permit {
                            Ok(permit) => break Some(permit),
                            Err(_) => {
                                failure = fetcher.cancelled::<()>().err();
                                break None;
                            }
                        }
                    }
                }
            };
            let Some(permit) = permit else { break };

            let uncounted = if chunk.start == 0 { uncounted } else { 0 };
            workers.spawn(Self::download_chunk_worker(
                fetcher.clone(),
                Arc::clone(&self.board),
                permit,
                artifact.clone(),
                chunk,
                total_size,
                uncounted,
            ));
        }

        while failure.is_none() {
            let Some(joined) = workers.join_next().await else {
                break;
            };
            if let Err(error) = tally.settle(joined, &fetcher) {
                failure = Some(error);
            }
        }

        if let Some(error) = failure {
            if !error.is_cancelled() {
                warn!(%error, "chunk failed, stopping remaining fetches");
            }
            gate.close();
            abort.cancel();
            // in-flight positional writes finish before the artifact is removed
            while workers.join_next().await.is_some() {}
            return Err(error);
        }

        if let Some(received) = tally.assembled_len.filter(|&len| len != total_size) {
            warn!(
                expected = total_size,
                received, "resource length differs from probe, resizing artifact"
            );
            artifact.set_len(received).await?;
            fetcher.progress().set_total(received);
        }

        Ok(tally.written)
    }

    /// Token for this run's workers, cancelled with the download or on the
    /// first chunk failure.
    fn fetcher_token(&self) -> CancellationToken { self.fetcher.cancel_token().child_token() }

    async fn download_chunk_worker(
        fetcher: ChunkFetcher,
        board: Arc<ChunkBoard>,
        _permit: OwnedSemaphorePermit,
        artifact: Artifact,
        chunk: Chunk,
        total_size: u64,
        uncounted: u64,
    ) -> Result<(Chunk, u64), DownloadError> {
        board.mark(chunk.index, ChunkStatus::InFlight);
        let mut sink = artifact.writer_at(chunk.start);
        match fetcher
            .fetch_chunk(&chunk, total_size, &mut sink, uncounted)
            .await
        {
            Ok(written) => {
                board.mark(chunk.index, ChunkStatus::Done);
                Ok((chunk, written))
            }
            Err(e) => {
                board.mark(chunk.index, ChunkStatus::Failed);
                Err(e)
            }
        }
    }
}

/// Running totals over finished workers.
#[derive(Debug, Default)]
struct Tally {
    written:       u64,
    /// End of the open-ended last chunk, once it finished
    assembled_len: Option<u64>,
}

impl Tally {
    fn settle(&mut self, joined: Joined, fetcher: &ChunkFetcher) -> Result<(), DownloadError> {
        let (chunk, bytes) = match joined {
            Ok(result) => result?,
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(_) => return fetcher.cancelled(),
        };
        self.written += bytes;
        if chunk.is_open() {
            self.assembled_len = Some(chunk.start + bytes);
        }
        Ok(())
    }
}
