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

use std::thread::available_parallelism;

use bon::Builder;
use snafu::ensure;

use crate::{
    error::{DownloadError, PlanningSnafu},
    types::{Chunk, DownloadSpec},
};

/// Derived chunks at or above this size are halved.
pub const LARGE_CHUNK_THRESHOLD: u64 = 100_000_000;

/// Upper bound of the default minimum chunk size.
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 2_000_000;

const MIN_DEFAULT_CONCURRENCY: usize = 4;
const MAX_DEFAULT_CONCURRENCY: usize = 20;

/// Knobs controlling how a resource is split into chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Builder)]
pub struct SizingParams {
    pub chunk_size:     Option<u64>,
    pub min_chunk_size: Option<u64>,
    pub max_chunk_size: Option<u64>,
    pub concurrency:    Option<usize>,
}

impl From<&DownloadSpec> for SizingParams {
    fn from(spec: &DownloadSpec) -> Self {
        Self {
            chunk_size:     spec.chunk_size,
            min_chunk_size: spec.min_chunk_size,
            max_chunk_size: spec.max_chunk_size,
            concurrency:    spec.concurrency,
        }
    }
}

impl SizingParams {
    /// Reject parameters no resource size could make sense of.
    pub fn validate(&self) -> Result<(), DownloadError> {
        ensure!(
            self.chunk_size != Some(0),
            PlanningSnafu {
                message: "chunk size must be greater than zero",
            }
        );
        ensure!(
            self.concurrency != Some(0),
            PlanningSnafu {
                message: "concurrency must be greater than zero",
            }
        );
        ensure!(
            self.max_chunk_size != Some(0),
            PlanningSnafu {
                message: "maximum chunk size must be greater than zero",
            }
        );
        if let (Some(min), Some(max)) = (self.min_chunk_size, self.max_chunk_size) {
            ensure!(
                min <= max,
                PlanningSnafu {
                    message: format!("minimum chunk size {min} exceeds maximum {max}"),
                }
            );
        }
        Ok(())
    }

    /// Concurrency bound, falling back to [`default_concurrency`].
    #[must_use]
    pub fn resolve_concurrency(&self) -> usize { self.concurrency.unwrap_or_else(default_concurrency) }

    /// Chunk size for a resource of `total_size` bytes, 0 when it cannot be
    /// split.
    #[must_use]
    pub fn resolve_chunk_size(&self, total_size: u64) -> u64 {
        if let Some(explicit) = self.chunk_size {
            return if explicit > total_size {
                total_size / 2
            } else {
                explicit
            };
        }

        let mut size = total_size / self.resolve_concurrency() as u64;
        if size >= LARGE_CHUNK_THRESHOLD {
            size /= 2;
        }

        let floor = self
            .min_chunk_size
            .unwrap_or_else(|| DEFAULT_MIN_CHUNK_SIZE.min(total_size / 2));
        size = size.max(floor);
        if let Some(ceiling) = self.max_chunk_size {
            size = size.min(ceiling);
        }

        if size >= total_size {
            size = total_size / 2;
        }
        size
    }
}

/// `3 × available parallelism`, clamped to `[4, 20]`.
#[must_use]
pub fn default_concurrency() -> usize {
    let cores = available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    cores
        .saturating_mul(3)
        .clamp(MIN_DEFAULT_CONCURRENCY, MAX_DEFAULT_CONCURRENCY)
}

/// Partition `[0, total_size)` into ascending, gap-free chunks.
///
/// An empty plan means the resource is fetched as one unsplit stream. Chunk
/// `i` starts at `i × size + i` so adjacent inclusive ranges never share a
/// byte, and the last chunk is left open so the server returns whatever
/// remains.
pub fn plan_chunks(
    total_size: u64,
    rangeable: bool,
    params: &SizingParams,
) -> Result<Vec<Chunk>, DownloadError> {
    params.validate()?;

    if !rangeable || total_size == 0 {
        return Ok(Vec::new());
    }

    let size = params.resolve_chunk_size(total_size);
    if size == 0 {
        return Ok(Vec::new());
    }

    let count = total_size / size;
    let mut chunks = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for i in 0..count {
        let start = i * size + i;
        let end = start + size;
        let index = chunks.len();
        if i + 1 == count || end >= total_size - 1 {
            chunks.push(Chunk {
                index,
                start,
                end: None,
            });
            break;
        }
        chunks.push(Chunk {
            index,
            start,
            end: Some(end),
        });
    }

    Ok(chunks)
}
