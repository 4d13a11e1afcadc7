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

use std::path::Path;

use snafu::ensure;
use tracing::info;

use crate::{
    assembler::StreamWriter,
    chunk_downloader::{ChunkFetcher, declared_length},
    error::{DownloadError, HttpSnafu},
};

/// Fetches the whole resource as one unsplit stream, for servers without
/// range support or resources too small to split.
pub(crate) struct SingleThreadDownloader<'a> {
    fetcher: &'a ChunkFetcher,
}

impl<'a> SingleThreadDownloader<'a> {
    pub(crate) const fn new(fetcher: &'a ChunkFetcher) -> Self { Self { fetcher } }

    /// Stream the resource into `output_path` and return the bytes written.
    ///
    /// `uncounted` leading bytes were already counted by the probe.
    pub(crate) async fn download(
        &self,
        output_path: &Path,
        uncounted: u64,
    ) -> Result<u64, DownloadError> {
        let response = self.fetcher.get(None).await?;
        let status = response.status();
        ensure!(
            status.is_success(),
            HttpSnafu {
                status: status.as_u16(),
                url:    self.fetcher.url().as_str(),
            }
        );

        if let Some(total) = declared_length(&response) {
            self.fetcher.progress().set_total(total);
        }
        info!(path = %output_path.display(), "starting single-stream download");

        let mut sink = StreamWriter::create(output_path).await?;
        let written = self
            .fetcher
            .stream_to(response, &mut sink, uncounted, None)
            .await?;
        self.fetcher.progress().set_total(written);
        Ok(written)
    }
}
