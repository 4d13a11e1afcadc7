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
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// Subscriber invoked with `(bytes received, total size, elapsed)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, Duration) + Send + Sync>;

/// Read-only view over download progress.
pub trait ProgressReporter: Send + Sync {
    /// Bytes received so far
    fn size(&self) -> u64;

    /// Expected total, 0 when unknown
    fn total_size(&self) -> u64;

    /// Time since the counter was created
    fn elapsed(&self) -> Duration;

    /// Bytes per second since the previous checkpoint
    fn speed(&self) -> u64;

    /// Bytes per second since start
    fn avg_speed(&self) -> u64 { per_second(self.size(), self.elapsed()) }
}

/// Shared byte counter fed by every fetcher.
///
/// Writers only ever add. Readers may observe a slightly stale value, which is
/// fine for informational metrics.
#[derive(Debug)]
pub struct ProgressState {
    size:        AtomicU64,
    total:       AtomicU64,
    last_size:   AtomicU64,
    last_sample: AtomicU64,
    started_at:  Instant,
}

impl Default for ProgressState {
    fn default() -> Self { Self::new(0) }
}

impl ProgressState {
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            size:        AtomicU64::new(0),
            total:       AtomicU64::new(total),
            last_size:   AtomicU64::new(0),
            last_sample: AtomicU64::new(0),
            started_at:  Instant::now(),
        }
    }

    /// Count `bytes` as received. Never fails and never rejects data.
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.add(bytes.len() as u64);
        bytes.len()
    }

    pub fn add(&self, n: u64) { self.size.fetch_add(n, Ordering::Relaxed); }

    pub(crate) fn set_total(&self, total: u64) { self.total.store(total, Ordering::Relaxed); }

    /// Record the current size as the baseline for [`ProgressReporter::speed`].
    pub fn checkpoint(&self) {
        self.last_size.store(self.size(), Ordering::Relaxed);
        self.last_sample
            .store(nanos(self.started_at.elapsed()), Ordering::Relaxed);
    }
}

impl ProgressReporter for ProgressState {
    fn size(&self) -> u64 { self.size.load(Ordering::Relaxed) }

    fn total_size(&self) -> u64 { self.total.load(Ordering::Relaxed) }

    fn elapsed(&self) -> Duration { self.started_at.elapsed() }

    fn speed(&self) -> u64 {
        let delta_bytes = self
            .size()
            .saturating_sub(self.last_size.load(Ordering::Relaxed));
        let now = nanos(self.elapsed());
        let delta = now.saturating_sub(self.last_sample.load(Ordering::Relaxed));
        per_second(delta_bytes, Duration::from_nanos(delta))
    }
}

fn nanos(duration: Duration) -> u64 { u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX) }

fn per_second(bytes: u64, over: Duration) -> u64 {
    let nanos = over.as_nanos();
    if nanos == 0 {
        return 0;
    }
    u64::try_from(u128::from(bytes) * 1_000_000_000 / nanos).unwrap_or(u64::MAX)
}

/// Call `callback` every `every` until `stop` fires, checkpointing after each
/// call so [`ProgressReporter::speed`] covers one interval.
pub(crate) fn spawn_progress_loop(
    progress: Arc<ProgressState>,
    callback: ProgressCallback,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    callback(progress.size(), progress.total_size(), progress.elapsed());
                    progress.checkpoint();
                }
            }
        }
    })
}
