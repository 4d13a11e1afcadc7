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

use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use parfetch_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use parfetch_downloader::{Download, DownloadSpec, Downloader, DownloaderConfig, RequestTemplate};
use snafu::{ResultExt, Whatever, ensure_whatever};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod build_info;
mod naming;
mod report;

#[derive(Debug, Parser)]
#[clap(
name = "parfetch",
about = "Download files over HTTP/HTTPS in parallel byte ranges",
author = build_info::AUTHOR,
version = build_info::VERSION,
long_version = build_info::LONG_VERSION)]
#[command(long_about = r"

Download one or more URLs, one after another. Servers that honour byte
ranges are fetched in concurrent chunks written straight into place.
Examples:

parfetch https://example.com/big.iso
parfetch -c 8 -s 4194304 -d downloads https://example.com/a.zip example.com/b.tar

")]
struct Cli {
    /// URLs to download; `https://` is assumed when no scheme is given
    #[arg(required = true)]
    urls: Vec<String>,

    /// Destination file, only valid with a single URL
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory the destination is placed in
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Maximum number of chunks fetched at the same time
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Fixed chunk size in bytes
    #[arg(short = 's', long)]
    chunk_size: Option<u64>,

    /// Lower bound for a derived chunk size
    #[arg(long)]
    min_chunk_size: Option<u64>,

    /// Upper bound for a derived chunk size
    #[arg(long)]
    max_chunk_size: Option<u64>,

    /// Extra request header, `Key: Value`; may be repeated
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Milliseconds between progress reports
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Log filter such as `info` or `info,parfetch_downloader=debug`
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Key: Value`, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing header name in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

impl Cli {
    fn logging_options(&self) -> LoggingOptions {
        LoggingOptions::builder()
            .maybe_level(self.log_level.clone())
            .log_format(self.log_format.into())
            .build()
    }

    async fn fetch(
        &self,
        downloader: &Downloader,
        raw: &str,
        cancel: CancellationToken,
    ) -> Result<(), Whatever> {
        let url = naming::normalize_url(raw);
        let request = RequestTemplate::new(&url, &self.headers)
            .with_whatever_context(|_| format!("Invalid request for {url}"))?;
        let output_path = naming::resolve_output(
            downloader.client(),
            &request,
            self.output.as_deref(),
            self.dir.as_deref(),
        )
        .await;

        let spec = DownloadSpec::builder()
            .url(url.clone())
            .output_path(output_path)
            .maybe_chunk_size(self.chunk_size)
            .maybe_min_chunk_size(self.min_chunk_size)
            .maybe_max_chunk_size(self.max_chunk_size)
            .maybe_concurrency(self.concurrency)
            .headers(self.headers.clone())
            .progress_interval(Duration::from_millis(self.interval_ms))
            .build();

        let mut download = Download::new(downloader.client().clone(), spec, cancel)
            .with_whatever_context(|_| format!("Failed to set up download of {url}"))?;
        download
            .plan()
            .await
            .with_whatever_context(|_| format!("Failed to probe {url}"))?;

        info!(
            url = %url,
            path = %download.spec().output_path.display(),
            total = %report::format_bytes(download.total_size()),
            rangeable = download.is_rangeable(),
            chunks = download.chunks().len(),
            concurrency = download.concurrency(),
            "starting download"
        );
        download.on_progress(report::progress_logger(url.clone(), download.progress()));

        let result = download
            .run()
            .await
            .with_whatever_context(|_| format!("Failed to download {url}"))?;
        let took = format!("{:#}", result.duration);
        info!(
            path = %result.path.display(),
            size = %report::format_bytes(result.size),
            avg = %format!("{}/s", report::format_bytes(download.avg_speed())),
            took = %took,
            "saved"
        );
        Ok(())
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupted, cancelling");
            cancel.cancel();
        }
        Err(error) => warn!(%error, "cannot listen for Ctrl-C"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("parfetch", &cli.logging_options())
        .whatever_context("Failed to initialize logging")?;
    set_panic_hook();

    ensure_whatever!(
        cli.output.is_none() || cli.urls.len() == 1,
        "--output can only be used with a single URL"
    );

    let downloader = Downloader::new(DownloaderConfig::default())
        .whatever_context("Failed to build the HTTP client")?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    for url in &cli.urls {
        cli.fetch(&downloader, url, cancel.child_token()).await?;
    }
    Ok(())
}
