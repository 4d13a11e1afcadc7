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

use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header::CONTENT_LENGTH};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    assembler::ByteSink,
    error::{CancelledSnafu, DownloadError, HttpSnafu, RangeMismatchSnafu, TransportSnafu},
    progress::ProgressState,
    request::RequestTemplate,
    types::Chunk,
};

/// Upper bound a ranged response body must not exceed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expected<'a> {
    pub range: &'a str,
    pub len:   u64,
}

/// Performs ranged GETs and streams bodies into a sink, mirroring every byte
/// into the shared progress counter.
///
/// Fetches are never retried; the first failure ends the download.
#[derive(Debug, Clone)]
pub struct ChunkFetcher {
    client:   Client,
    request:  Arc<RequestTemplate>,
    progress: Arc<ProgressState>,
    cancel:   CancellationToken,
}

impl ChunkFetcher {
    pub const fn new(
        client: Client,
        request: Arc<RequestTemplate>,
        progress: Arc<ProgressState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            request,
            progress,
            cancel,
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url { self.request.url() }

    pub(crate) fn progress(&self) -> &ProgressState { &self.progress }

    pub(crate) const fn cancel_token(&self) -> &CancellationToken { &self.cancel }

    pub async fn head(&self) -> Result<Response, DownloadError> {
        self.send(self.request.head(&self.client)).await
    }

    /// GET the resource, optionally restricted to `range`.
    pub async fn get(&self, range: Option<&str>) -> Result<Response, DownloadError> {
        let builder = match range {
            Some(range) => self.request.ranged(&self.client, range),
            None => self.request.get(&self.client),
        };
        self.send(builder).await
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, DownloadError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => self.cancelled(),
            response = builder.send() => response.context(TransportSnafu),
        }
    }

    /// Same fetcher observing a different cancellation token.
    #[must_use]
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub(crate) fn cancelled<T>(&self) -> Result<T, DownloadError> {
        CancelledSnafu {
            url: self.url().as_str(),
        }
        .fail()
    }

    /// Fetch one planned chunk into `sink`.
    ///
    /// The first `uncounted` bytes were already reported as progress by the
    /// probe and are written without being counted again.
    pub async fn fetch_chunk<S: ByteSink>(
        &self,
        chunk: &Chunk,
        total_size: u64,
        sink: &mut S,
        uncounted: u64,
    ) -> Result<u64, DownloadError> {
        let range = chunk.range_header();
        debug!(index = chunk.index, %range, "fetching chunk");

        let response = self.get(Some(&range)).await?;
        let status = response.status();
        ensure!(
            status.is_success(),
            HttpSnafu {
                status: status.as_u16(),
                url:    self.url().as_str(),
            }
        );
        let declared = declared_length(&response);

        let written = if let Some(expected) = chunk.len() {
            // a finite range must be honoured exactly or the assembly is corrupt
            let acknowledged = status == StatusCode::PARTIAL_CONTENT
                && declared.is_none_or(|declared| declared == expected);
            ensure!(
                acknowledged,
                RangeMismatchSnafu {
                    range: range.as_str(),
                    status: status.as_u16(),
                    expected,
                    actual: declared.unwrap_or_default(),
                }
            );

            let limit = Expected {
                range: &range,
                len:   expected,
            };
            let written = self
                .stream_to(response, sink, uncounted, Some(limit))
                .await?;
            ensure!(
                written == expected,
                RangeMismatchSnafu {
                    range: range.as_str(),
                    status: status.as_u16(),
                    expected,
                    actual: written,
                }
            );
            written
        } else {
            // a full body for a non-zero start would land at the wrong offset
            let expected = total_size.saturating_sub(chunk.start);
            ensure!(
                status != StatusCode::OK || chunk.start == 0,
                RangeMismatchSnafu {
                    range: range.as_str(),
                    status: status.as_u16(),
                    expected,
                    actual: declared.unwrap_or_default(),
                }
            );
            self.stream_to(response, sink, uncounted, None).await?
        };

        debug!(index = chunk.index, bytes = written, "chunk finished");
        Ok(written)
    }

    /// Stream `response` into `sink` until the body ends, then finish the
    /// sink. Returns the number of bytes written.
    pub(crate) async fn stream_to<S: ByteSink>(
        &self,
        response: Response,
        sink: &mut S,
        uncounted: u64,
        limit: Option<Expected<'_>>,
    ) -> Result<u64, DownloadError> {
        let status = response.status().as_u16();
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return self.cancelled(),
                next = stream.next() => next,
            };
            let Some(bytes) = next else { break };
            let bytes = bytes.context(TransportSnafu)?;
            let len = bytes.len() as u64;

            if let Some(limit) = limit {
                ensure!(
                    written + len <= limit.len,
                    RangeMismatchSnafu {
                        range: limit.range,
                        status,
                        expected: limit.len,
                        actual: written + len,
                    }
                );
            }

            let skip = uncounted.saturating_sub(written).min(len);
            let counted = bytes.slice(usize::try_from(skip).unwrap_or(bytes.len())..);
            sink.write_bytes(bytes).await?;
            self.progress.write(&counted);
            written += len;
        }

        sink.finish().await?;
        Ok(written)
    }
}

/// `Content-Length` as sent by the server.
///
/// Read from the header because `Response::content_length` reports the
/// decoded body size, which is 0 for HEAD responses.
pub(crate) fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
