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

use reqwest::{
    Response, StatusCode,
    header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE},
};
use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    assembler::{StreamWriter, remove_artifact},
    chunk_downloader::{ChunkFetcher, declared_length},
    error::{DownloadError, ProbeSnafu},
    types::RemoteInfo,
};

/// Range requested when the metadata request is inconclusive.
pub const PROBE_RANGE: &str = "bytes=0-1";

/// Bytes the probe already placed in the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prefetched {
    Nothing,
    /// The first `n` bytes were written and counted as progress.
    Head(u64),
    /// The whole resource (`n` bytes) was written.
    Complete(u64),
}

#[derive(Debug, Clone)]
pub(crate) struct ProbeOutcome {
    pub info:       RemoteInfo,
    pub prefetched: Prefetched,
}

/// Successful HEAD answer, with the `Content-Length` as declared.
struct HeadAnswer {
    info:   RemoteInfo,
    length: Option<u64>,
}

/// Learns the size and range support of a resource.
///
/// Tries HEAD first, then a tiny ranged GET whose body is kept as payload.
pub(crate) struct CapabilityProber<'a> {
    fetcher:     &'a ChunkFetcher,
    destination: &'a Path,
}

impl<'a> CapabilityProber<'a> {
    pub(crate) const fn new(fetcher: &'a ChunkFetcher, destination: &'a Path) -> Self {
        Self {
            fetcher,
            destination,
        }
    }

    pub(crate) async fn probe(&self) -> Result<ProbeOutcome, DownloadError> {
        let head = self.probe_head().await?;
        // a declared empty body needs no range support to be fetched
        if let Some(answer) = head.as_ref().filter(|answer| {
            answer.length == Some(0) || (answer.info.rangeable && answer.info.total_size > 0)
        }) {
            return Ok(ProbeOutcome {
                info:       answer.info.clone(),
                prefetched: Prefetched::Nothing,
            });
        }
        self.probe_range(head.map(|answer| answer.info).unwrap_or_default())
            .await
    }

    /// `None` when the server refused HEAD and capability is still unknown.
    async fn probe_head(&self) -> Result<Option<HeadAnswer>, DownloadError> {
        let response = self.fetcher.head().await?;
        let status = response.status();

        if status.is_success() {
            let length = declared_length(&response);
            let info = RemoteInfo {
                total_size: length.unwrap_or_default(),
                rangeable:  accepts_byte_ranges(&response),
                redirected: self.redirected(&response),
                file_name:  file_name_of(&response),
            };
            debug!(?info, "HEAD probe answered");
            return Ok(Some(HeadAnswer { info, length }));
        }

        ensure!(
            status != StatusCode::NOT_FOUND && !status.is_server_error(),
            ProbeSnafu {
                status: status.as_u16(),
                url:    self.fetcher.url().as_str(),
            }
        );
        debug!(status = status.as_u16(), "HEAD inconclusive, falling back to ranged GET");
        Ok(None)
    }

    async fn probe_range(&self, head: RemoteInfo) -> Result<ProbeOutcome, DownloadError> {
        let response = self.fetcher.get(Some(PROBE_RANGE)).await?;
        let status = response.status();

        let redirected = head.redirected || self.redirected(&response);
        let file_name = file_name_of(&response).or(head.file_name);

        // `bytes */0`: no byte of an empty resource can be addressed
        if status == StatusCode::RANGE_NOT_SATISFIABLE
            && content_range_total(&response) == Some(0)
        {
            debug!("empty resource, nothing to split");
            return Ok(ProbeOutcome {
                info:       RemoteInfo {
                    total_size: 0,
                    rangeable: false,
                    redirected,
                    file_name,
                },
                prefetched: Prefetched::Nothing,
            });
        }

        ensure!(
            status.is_success(),
            ProbeSnafu {
                status: status.as_u16(),
                url:    self.fetcher.url().as_str(),
            }
        );

        if status == StatusCode::PARTIAL_CONTENT {
            let Some(total) = content_range_total(&response) else {
                debug!("partial content without a usable Content-Range, not splitting");
                return Ok(ProbeOutcome {
                    info:       RemoteInfo {
                        total_size: head.total_size,
                        rangeable: false,
                        redirected,
                        file_name,
                    },
                    prefetched: Prefetched::Nothing,
                });
            };

            self.fetcher.progress().set_total(total);
            let written = self.keep_body(response).await?;
            let prefetched = if written >= total {
                Prefetched::Complete(written)
            } else {
                Prefetched::Head(written)
            };
            return Ok(ProbeOutcome {
                info: RemoteInfo {
                    total_size: total,
                    rangeable: true,
                    redirected,
                    file_name,
                },
                prefetched,
            });
        }

        // the server ignored the range and is sending the whole resource
        if let Some(total) = declared_length(&response) {
            self.fetcher.progress().set_total(total);
        }
        let written = self.keep_body(response).await?;
        self.fetcher.progress().set_total(written);
        Ok(ProbeOutcome {
            info:       RemoteInfo {
                total_size: written,
                rangeable: false,
                redirected,
                file_name,
            },
            prefetched: Prefetched::Complete(written),
        })
    }

    /// Write the probe body to the destination, removing it again on failure.
    async fn keep_body(&self, response: Response) -> Result<u64, DownloadError> {
        let mut sink = StreamWriter::create(self.destination).await?;
        match self.fetcher.stream_to(response, &mut sink, 0, None).await {
            Ok(written) => Ok(written),
            Err(e) => {
                drop(sink);
                if let Err(cleanup) = remove_artifact(self.destination).await {
                    warn!(error = %cleanup, "failed to remove partial probe body");
                }
                Err(e)
            }
        }
    }

    fn redirected(&self, response: &Response) -> bool { response.url() != self.fetcher.url() }
}

fn accepts_byte_ranges(response: &Response) -> bool {
    response
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"))
}

fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_range_total)
}

fn file_name_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
}

/// Total length from a `Content-Range` value such as `bytes 0-1/1234`.
///
/// Returns `None` when the total is unknown (`*`) or malformed.
#[must_use]
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().split_once('/')?;
    total.trim().parse().ok()
}

/// Filename from a `Content-Disposition` value, stripped of quotes and any
/// directory components.
#[must_use]
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let raw = value.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| value.trim())
    })?;

    let unquoted = raw.trim_matches('"').trim();
    let name = unquoted
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(unquoted)
        .trim();
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}
