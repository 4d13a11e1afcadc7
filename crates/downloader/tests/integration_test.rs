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
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_test::TestServer;
use futures::StreamExt;
use parfetch_downloader::{
    ChunkStatus, Download, DownloadError, DownloadPhase, DownloadSpec, Downloader,
    DownloaderConfig, ErrorKind,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, PartialEq, Eq)]
enum HeadMode {
    Ok,
    NotAllowed,
    NotFound,
}

#[derive(Clone)]
struct AppState {
    content:         Arc<Vec<u8>>,
    accept_ranges:   bool,
    head:            HeadMode,
    /// Answer every GET with the full body, even when a range was asked for
    ignore_range:    bool,
    /// Report `*` as the total in `Content-Range`
    unknown_total:   bool,
    /// Send the first bytes of each ranged body, then hang
    stall:           bool,
    required_header: Option<(&'static str, &'static str)>,
    /// `Content-Length` announced by HEAD instead of the real length
    advertised_len:  Option<usize>,
    /// Hold every ranged body back this long before answering
    range_delay:     Option<Duration>,
    in_flight:       Arc<AtomicUsize>,
    peak_in_flight:  Arc<AtomicUsize>,
}

impl AppState {
    fn new(content: Vec<u8>) -> Self {
        Self {
            content:         Arc::new(content),
            accept_ranges:   true,
            head:            HeadMode::Ok,
            ignore_range:    false,
            unknown_total:   false,
            stall:           false,
            required_header: None,
            advertised_len:  None,
            range_delay:     None,
            in_flight:       Arc::new(AtomicUsize::new(0)),
            peak_in_flight:  Arc::new(AtomicUsize::new(0)),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        self.required_header
            .is_none_or(|(name, value)| headers.get(name).is_some_and(|v| v == value))
    }
}

async fn handle_head(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.head {
        HeadMode::NotAllowed => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
        HeadMode::NotFound => return StatusCode::NOT_FOUND.into_response(),
        HeadMode::Ok => {}
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(
            &state
                .advertised_len
                .unwrap_or(state.content.len())
                .to_string(),
        )
        .unwrap(),
    );
    if state.accept_ranges {
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"payload.bin\""),
    );
    (StatusCode::OK, response_headers).into_response()
}

async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.head == HeadMode::NotFound {
        return StatusCode::NOT_FOUND.into_response();
    }

    let total_len = state.content.len();
    let requested = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let range = requested.and_then(|value| parse_range(value, total_len));

    let honour_ranges = state.accept_ranges && !state.ignore_range;
    if honour_ranges && requested.is_some() && range.is_none() {
        return (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total_len}"))],
        )
            .into_response();
    }

    if let Some((start, end)) = range.filter(|_| honour_ranges) {
        if let Some(delay) = state.range_delay {
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        let slice = Bytes::copy_from_slice(&state.content[start..=end]);
        let total = if state.unknown_total {
            "*".to_string()
        } else {
            total_len.to_string()
        };

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
        );
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&slice.len().to_string()).unwrap(),
        );

        if state.stall {
            let head = slice.slice(..1);
            let body = futures::stream::once(async move { Ok::<_, std::io::Error>(head) })
                .chain(futures::stream::pending());
            return (
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                Body::from_stream(body),
            )
                .into_response();
        }
        return (StatusCode::PARTIAL_CONTENT, response_headers, slice).into_response();
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&total_len.to_string()).unwrap(),
    );
    (
        StatusCode::OK,
        response_headers,
        Bytes::copy_from_slice(&state.content),
    )
        .into_response()
}

async fn redirect_to_file() -> Redirect { Redirect::temporary("/file") }

/// Parses `bytes=a-b` and `bytes=a-`, clamping the end to the resource.
fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = if end_str.is_empty() {
        total.checked_sub(1)?
    } else {
        end_str.parse::<usize>().ok()?.min(total.checked_sub(1)?)
    };
    (start <= end).then_some((start, end))
}

fn create_temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("parfetch-{prefix}-"))
        .tempdir()
        .expect("failed to create temp dir")
}

fn create_test_server(state: AppState) -> TestServer {
    let app = Router::new()
        .route("/file", get(handle_get).head(handle_head))
        .route("/moved", get(redirect_to_file).head(redirect_to_file))
        .with_state(state);

    TestServer::builder()
        .http_transport()
        .try_build(app)
        .expect("failed to create test server")
}

fn url_for(server: &TestServer, path: &str) -> String {
    let base = server
        .server_address()
        .expect("server should have HTTP address")
        .to_string();
    format!("{}/{path}", base.trim_end_matches('/'))
}

/// Deterministic, non-repeating-looking payload so misplaced bytes show up.
fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 251) as u8).collect()
}

fn client() -> reqwest::Client { DownloaderConfig::default().build_client().unwrap() }

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_trip_is_byte_identical_across_concurrency() {
    let content = sample_content(1_000);
    let server = create_test_server(AppState::new(content.clone()));
    let out = create_temp_dir("roundtrip");

    for concurrency in [1, 2, 8] {
        let output_path = out.path().join(format!("c{concurrency}.bin"));
        let spec = DownloadSpec::builder()
            .url(url_for(&server, "file"))
            .output_path(&output_path)
            .chunk_size(10)
            .concurrency(concurrency)
            .build();

        let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
        let info = download.plan().await.unwrap().clone();
        assert_eq!(info.total_size, 1_000);
        assert!(info.rangeable);
        assert_eq!(info.file_name.as_deref(), Some("payload.bin"));
        assert_eq!(download.phase(), DownloadPhase::Ready);
        assert_eq!(download.concurrency(), concurrency);

        let result = download.run().await.unwrap();
        assert_eq!(result.size, 1_000);
        assert!(result.chunks > 1);
        assert_eq!(download.phase(), DownloadPhase::Completed);
        assert_eq!(download.size(), 1_000);
        assert!(
            download
                .chunks()
                .iter()
                .all(|state| state.status == ChunkStatus::Done)
        );
        assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
    }
}

#[tokio::test]
async fn head_rejection_falls_back_to_ranged_probe() {
    let content = sample_content(4_096);
    let mut state = AppState::new(content.clone());
    state.head = HeadMode::NotAllowed;
    let server = create_test_server(state);
    let out = create_temp_dir("fallback");
    let output_path = out.path().join("fallback.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(512)
        .concurrency(4)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert!(download.is_rangeable());
    assert_eq!(download.total_size(), 4_096);
    // the probe body is already payload
    assert_eq!(download.size(), 2);

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 4_096);
    // probe bytes are not counted twice
    assert_eq!(download.size(), 4_096);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn full_body_probe_skips_fetching() {
    let content = sample_content(3_000);
    let mut state = AppState::new(content.clone());
    state.head = HeadMode::NotAllowed;
    state.accept_ranges = false;
    let server = create_test_server(state);
    let out = create_temp_dir("fullprobe");
    let output_path = out.path().join("full.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert!(!download.is_rangeable());
    assert!(download.chunks().is_empty());

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 3_000);
    assert_eq!(result.chunks, 0);
    assert_eq!(download.size(), 3_000);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn unknown_total_downloads_as_single_stream() {
    let content = sample_content(2_500);
    let mut state = AppState::new(content.clone());
    state.head = HeadMode::NotAllowed;
    state.unknown_total = true;
    let server = create_test_server(state);
    let out = create_temp_dir("single");
    let output_path = out.path().join("nested/single.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(100)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert!(!download.is_rangeable());
    assert!(download.chunks().is_empty());

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 2_500);
    assert!(!result.rangeable);
    assert_eq!(download.size(), 2_500);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_removes_partial_artifact() {
    let mut state = AppState::new(sample_content(10_000));
    state.stall = true;
    let server = create_test_server(state);
    let out = create_temp_dir("cancel");
    let output_path = out.path().join("stalled.bin");

    let cancel = CancellationToken::new();
    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(1_000)
        .concurrency(4)
        .build();
    let mut download = Download::new(client(), spec, cancel.clone()).unwrap();
    download.plan().await.unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(10), download.run())
        .await
        .expect("cancellation should end the run")
        .unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(download.phase(), DownloadPhase::Cancelled);
    assert!(!output_path.exists());
}

#[tokio::test]
async fn ignored_range_is_a_mismatch() {
    let mut state = AppState::new(sample_content(2_000));
    state.ignore_range = true;
    let server = create_test_server(state);
    let out = create_temp_dir("mismatch");
    let output_path = out.path().join("mismatch.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(500)
        .concurrency(2)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();

    let err = download.run().await.unwrap_err();
    assert!(
        matches!(err, DownloadError::RangeMismatch { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(download.phase(), DownloadPhase::Failed);
    assert!(
        download
            .chunks()
            .iter()
            .any(|state| state.status == ChunkStatus::Failed)
    );
    assert!(!output_path.exists());
}

#[tokio::test]
async fn progress_samples_are_monotonic() {
    let content = sample_content(50_000);
    let server = create_test_server(AppState::new(content));
    let out = create_temp_dir("progress");

    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(out.path().join("progress.bin"))
        .chunk_size(1_000)
        .concurrency(3)
        .progress_interval(Duration::from_millis(1))
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.on_progress(move |size, total, _| sink.lock().unwrap().push((size, total)));
    download.plan().await.unwrap();
    download.run().await.unwrap();

    let samples = samples.lock().unwrap();
    assert!(!samples.is_empty());
    assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(samples.last().copied(), Some((50_000, 50_000)));
    assert!(download.avg_speed() > 0);
}

#[tokio::test]
async fn missing_resource_fails_planning() {
    let mut state = AppState::new(sample_content(100));
    state.head = HeadMode::NotFound;
    let server = create_test_server(state);
    let out = create_temp_dir("missing");
    let output_path = out.path().join("missing.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();

    let err = download.plan().await.unwrap_err();
    assert!(
        matches!(err, DownloadError::Probe { status: 404, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(download.phase(), DownloadPhase::Failed);
    assert!(!output_path.exists());
}

#[tokio::test]
async fn lifecycle_rejects_out_of_order_calls() {
    let server = create_test_server(AppState::new(sample_content(300)));
    let out = create_temp_dir("phase");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(out.path().join("phase.bin"))
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();

    let err = download.run().await.unwrap_err();
    assert!(matches!(err, DownloadError::InvalidPhase { .. }));
    assert_eq!(download.phase(), DownloadPhase::Created);

    download.plan().await.unwrap();
    assert!(matches!(
        download.plan().await.unwrap_err(),
        DownloadError::InvalidPhase { .. }
    ));

    download.run().await.unwrap();
    assert!(download.phase().is_terminal());
    assert!(matches!(
        download.run().await.unwrap_err(),
        DownloadError::InvalidPhase { .. }
    ));
}

#[tokio::test]
async fn invalid_sizing_is_rejected_before_any_request() {
    let spec = DownloadSpec::builder()
        .url("http://127.0.0.1:9/never")
        .output_path("never.bin")
        .min_chunk_size(100)
        .max_chunk_size(10)
        .build();
    let err = Download::new(client(), spec, CancellationToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Planning);
}

#[tokio::test]
async fn redirect_is_followed_and_reported() {
    let content = sample_content(1_500);
    let server = create_test_server(AppState::new(content.clone()));
    let out = create_temp_dir("redirect");
    let output_path = out.path().join("redirect.bin");

    let downloader = Downloader::new(DownloaderConfig::default()).unwrap();
    let spec = DownloadSpec::builder()
        .url(url_for(&server, "moved"))
        .output_path(&output_path)
        .chunk_size(400)
        .build();
    let mut download = downloader
        .prepare(spec, CancellationToken::new())
        .await
        .unwrap();
    assert!(download.is_redirected());

    download.run().await.unwrap();
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn custom_headers_reach_every_request() {
    let content = sample_content(2_048);
    let mut state = AppState::new(content.clone());
    state.required_header = Some(("x-token", "secret"));
    let server = create_test_server(state);
    let out = create_temp_dir("headers");
    let downloader = Downloader::new(DownloaderConfig::default()).unwrap();

    let denied = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(out.path().join("denied.bin"))
        .build();
    let err = downloader
        .download(denied, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, DownloadError::Probe { status: 403, .. }),
        "unexpected error: {err}"
    );

    let output_path = out.path().join("allowed.bin");
    let allowed = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(256)
        .headers(vec![("X-Token".to_string(), "secret".to_string())])
        .build();
    let result = downloader
        .download(allowed, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.size, 2_048);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn empty_resource_with_length_header_is_written_empty() {
    let server = create_test_server(AppState::new(Vec::new()));
    let out = create_temp_dir("empty");
    let output_path = out.path().join("empty.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert_eq!(download.total_size(), 0);
    assert!(download.chunks().is_empty());

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 0);
    assert_eq!(download.phase(), DownloadPhase::Completed);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn empty_resource_behind_unsatisfiable_range_is_written_empty() {
    let mut state = AppState::new(Vec::new());
    state.head = HeadMode::NotAllowed;
    let server = create_test_server(state);
    let out = create_temp_dir("empty416");
    let output_path = out.path().join("empty.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert!(!download.is_rangeable());
    assert_eq!(download.total_size(), 0);

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 0);
    assert!(output_path.exists());
    assert_eq!(tokio::fs::metadata(&output_path).await.unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shorter_body_than_advertised_is_trimmed() {
    let content = sample_content(900);
    let mut state = AppState::new(content.clone());
    state.advertised_len = Some(1_000);
    let server = create_test_server(state);
    let out = create_temp_dir("shrunk");
    let output_path = out.path().join("shrunk.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(300)
        .concurrency(2)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert_eq!(download.total_size(), 1_000);

    let result = download.run().await.unwrap();
    assert_eq!(result.size, 900);
    assert_eq!(download.total_size(), 900);
    assert_eq!(download.size(), 900);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_chunks_never_exceed_concurrency() {
    let content = sample_content(20_000);
    let mut state = AppState::new(content.clone());
    state.range_delay = Some(Duration::from_millis(5));
    let peak = Arc::clone(&state.peak_in_flight);
    let server = create_test_server(state);
    let out = create_temp_dir("bounded");
    let output_path = out.path().join("bounded.bin");

    let spec = DownloadSpec::builder()
        .url(url_for(&server, "file"))
        .output_path(&output_path)
        .chunk_size(99)
        .concurrency(3)
        .build();
    let mut download = Download::new(client(), spec, CancellationToken::new()).unwrap();
    download.plan().await.unwrap();
    assert_eq!(download.chunks().len(), 200);

    download.run().await.unwrap();
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak in flight was {peak}");
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}
