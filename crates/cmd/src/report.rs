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

use parfetch_downloader::{ProgressReporter, ProgressState};
use tracing::info;

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Progress callback that emits one `info` event per tick.
///
/// `total` is 0 while the size is unknown and is then reported as `?`.
pub fn progress_logger(
    url: String,
    progress: Arc<ProgressState>,
) -> impl Fn(u64, u64, Duration) + Send + Sync + 'static {
    move |size, total, elapsed| {
        let total = if total == 0 {
            "?".to_string()
        } else {
            format_bytes(total)
        };
        info!(
            target: "parfetch::progress",
            url = %url,
            progress = %format!("{}/{total}", format_bytes(size)),
            elapsed = ?Duration::from_secs(elapsed.as_secs()),
            speed = %format!("{}/s", format_bytes(progress.speed())),
            avg = %format!("{}/s", format_bytes(progress.avg_speed())),
            "downloading"
        );
    }
}
