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

use std::{io, sync::Arc};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_test::TestServer;
use futures::StreamExt;
use jiff::SignedDuration;
use rangefetch_base::readable_size::ReadableSize;
use rangefetch_common_telemetry::logging::init_default_ut_logging;
use rangefetch_downloader::{
    BatchFetcher, ByteRange, DownloadCoordinator, DownloadError, DownloaderConfig, JobStatus,
    WholeFileFetcher,
};
use tempfile::TempDir;

/// How the test server answers a GET.
#[derive(Clone, Copy)]
enum Behavior {
    /// Honors `Range` with 206 and a `Content-Range`
    Ranged,
    /// Always sends the full body with 200
    IgnoresRange,
    /// Streams the full body without `Content-Length`
    NoLength,
    /// Sends part of the range starting at this offset, then breaks the body
    FailsAt(usize),
    /// Sends part of the range starting at this offset, then never finishes
    StallsAt(usize),
    /// Sends the right bytes but labels every range after the first as
    /// starting one byte earlier
    WrongSpan,
}

#[derive(Clone)]
struct AppState {
    content:  Arc<Vec<u8>>,
    behavior: Behavior,
}

async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    let total_len = state.content.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, total_len));

    match (state.behavior, range) {
        (Behavior::NoLength, _) => {
            let pieces: Vec<Result<Bytes, io::Error>> = state
                .content
                .chunks(1024)
                .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                .collect();
            (StatusCode::OK, Body::from_stream(futures::stream::iter(pieces))).into_response()
        }
        (Behavior::FailsAt(at), Some((start, end))) if at == start => {
            let head = Bytes::copy_from_slice(&state.content[start..start + (end - start) / 2]);
            let body = futures::stream::iter(vec![
                Ok(head),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream went away")),
            ]);
            (StatusCode::PARTIAL_CONTENT, Body::from_stream(body)).into_response()
        }
        (Behavior::StallsAt(at), Some((start, end))) if at == start => {
            let head = Bytes::copy_from_slice(&state.content[start..start + (end - start) / 2]);
            let body = futures::stream::iter(vec![Ok::<_, io::Error>(head)])
                .chain(futures::stream::pending());
            (StatusCode::PARTIAL_CONTENT, Body::from_stream(body)).into_response()
        }
        (Behavior::WrongSpan, Some((start, end))) if start > 0 => {
            partial_body(&state.content, start, end, (start - 1, end - 1))
        }
        (Behavior::IgnoresRange, _) | (_, None) => full_body(&state.content),
        (_, Some((start, end))) => partial_body(&state.content, start, end, (start, end)),
    }
}

fn full_body(content: &[u8]) -> Response {
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&content.len().to_string()).unwrap(),
    );
    (
        StatusCode::OK,
        response_headers,
        Bytes::copy_from_slice(content),
    )
        .into_response()
}

fn partial_body(content: &[u8], start: usize, end: usize, claimed: (usize, usize)) -> Response {
    let slice = &content[start..=end];
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!(
            "bytes {}-{}/{}",
            claimed.0,
            claimed.1,
            content.len()
        ))
        .unwrap(),
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&slice.len().to_string()).unwrap(),
    );
    (
        StatusCode::PARTIAL_CONTENT,
        response_headers,
        Bytes::copy_from_slice(slice),
    )
        .into_response()
}

async fn broken_body() -> Response {
    let body = futures::stream::iter(vec![
        Ok(Bytes::from(vec![b'B'; 16 * 1024])),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream went away")),
    ]);
    (StatusCode::OK, Body::from_stream(body)).into_response()
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = end_str.parse().ok()?;
    if start <= end && end < total {
        Some((start, end))
    } else {
        None
    }
}

/// Deterministic, non-repeating-per-block content so misplaced writes show up.
fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn create_temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("rangefetch-{}-", prefix))
        .tempdir()
        .expect("failed to create temp dir")
}

fn create_test_server(content: Vec<u8>, behavior: Behavior) -> TestServer {
    let app = Router::new()
        .route("/file", get(handle_get))
        .with_state(AppState {
            content: Arc::new(content),
            behavior,
        });

    // HTTP transport so reqwest can reach it over a real socket
    TestServer::builder()
        .http_transport()
        .try_build(app)
        .expect("failed to create test server")
}

/// Fixed files for the whole-file paths: two names sharing a stem and one
/// body that breaks halfway.
fn create_static_server() -> TestServer {
    let app = Router::new()
        .route("/a.jpg", get(|| async { full_body(&vec![b'J'; 64 * 1024]) }))
        .route("/a.png", get(|| async { full_body(&vec![b'P'; 64 * 1024]) }))
        .route("/broken.bin", get(broken_body));

    TestServer::builder()
        .http_transport()
        .try_build(app)
        .expect("failed to create test server")
}

fn get_url(server: &TestServer, path: &str) -> String {
    let base = server
        .server_address()
        .expect("server should have HTTP address")
        .to_string();
    if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

fn get_file_url(server: &TestServer) -> String { get_url(server, "file") }

fn coordinator(workers: usize) -> DownloadCoordinator {
    init_default_ut_logging();
    let config = DownloaderConfig::builder()
        .workers(workers)
        .chunk_size(ReadableSize::kb(1))
        .build();
    DownloadCoordinator::new(config).expect("valid config")
}

#[tokio::test]
async fn download_parallel_with_range_support() {
    let content = sample_content(30_000);
    let server = create_test_server(content.clone(), Behavior::Ranged);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("parallel.bin");

    let coordinator = coordinator(3);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.total_bytes_expected, 30_000);
    assert_eq!(result.total_bytes_written, 30_000);
    let ranges: Vec<_> = result.outcomes.iter().map(|o| o.range).collect();
    assert_eq!(
        ranges,
        vec![
            ByteRange {
                start: 0,
                end:   9999,
            },
            ByteRange {
                start: 10000,
                end:   19999,
            },
            ByteRange {
                start: 20000,
                end:   29999,
            },
        ]
    );
    assert!(result.outcomes.iter().all(|o| o.bytes_written == 10_000));

    let downloaded = tokio::fs::read(&output_path).await.unwrap();
    assert_eq!(downloaded, content);
}

#[tokio::test]
async fn rerun_overwrites_longer_existing_file() {
    let content = sample_content(12_345);
    let server = create_test_server(content.clone(), Behavior::Ranged);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("rerun.bin");
    tokio::fs::write(&output_path, vec![0xFF; 50_000])
        .await
        .unwrap();

    let coordinator = coordinator(4);
    let job = coordinator.job(get_file_url(&server), &output_path);
    for _ in 0..2 {
        let result = coordinator.run(&job).await;
        assert!(result.is_success());
        let downloaded = tokio::fs::read(&output_path).await.unwrap();
        assert_eq!(downloaded, content);
    }
}

#[tokio::test]
async fn more_workers_than_bytes() {
    let content = b"hello".to_vec();
    let server = create_test_server(content.clone(), Behavior::Ranged);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("tiny.bin");

    let coordinator = coordinator(16);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert!(result.is_success());
    assert_eq!(result.outcomes.len(), 5);
    assert!(result.outcomes.iter().all(|o| o.range.len() == 1));
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn single_worker_downloads_whole_range() {
    let content = sample_content(4_097);
    let server = create_test_server(content.clone(), Behavior::Ranged);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("single.bin");

    let coordinator = coordinator(1);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert!(result.is_success());
    assert_eq!(result.outcomes.len(), 1);
    assert_eq!(result.outcomes[0].range, ByteRange {
        start: 0,
        end:   4_096,
    });
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);
}

#[tokio::test]
async fn missing_content_length_stops_before_workers() {
    let server = create_test_server(sample_content(5_000), Behavior::NoLength);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("nolength.bin");

    let coordinator = coordinator(4);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert!(result.outcomes.is_empty());
    assert_eq!(result.total_bytes_written, 0);
    assert!(matches!(
        result.overall_error,
        Some(DownloadError::SizeUnavailable { .. })
    ));
    assert!(!output_path.exists(), "no output is prepared before planning");
}

#[tokio::test]
async fn server_ignoring_range_fails_all_but_first_range() {
    let content = sample_content(9_000);
    let server = create_test_server(content.clone(), Behavior::IgnoresRange);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("norange.bin");

    let coordinator = coordinator(3);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert_eq!(result.outcomes.len(), 3);
    assert!(result.outcomes[0].is_success());
    assert_eq!(result.outcomes[0].bytes_written, 3_000);
    for outcome in &result.outcomes[1..] {
        assert!(matches!(
            outcome.error,
            Some(DownloadError::RangeNotSupported { status: 200, .. })
        ));
        assert_eq!(outcome.bytes_written, 0);
    }

    // The first range still landed at its offsets; the rest stays zeroed.
    let downloaded = tokio::fs::read(&output_path).await.unwrap();
    assert_eq!(downloaded.len(), 9_000);
    assert_eq!(&downloaded[..3_000], &content[..3_000]);
    assert!(downloaded[3_000..].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn mid_stream_failure_is_isolated_to_its_range() {
    let content = sample_content(30_000);
    let server = create_test_server(content.clone(), Behavior::FailsAt(10_000));
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("broken.bin");

    let coordinator = coordinator(3);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert_eq!(result.failed_ranges(), vec![ByteRange {
        start: 10000,
        end:   19999,
    }]);
    assert_eq!(result.outcomes[0].bytes_written, 10_000);
    assert_eq!(result.outcomes[2].bytes_written, 10_000);
    assert!(result.outcomes[1].bytes_written < 10_000);
    assert!(result.outcomes[1].error.is_some());

    let downloaded = tokio::fs::read(&output_path).await.unwrap();
    assert_eq!(&downloaded[..10_000], &content[..10_000]);
    assert_eq!(&downloaded[20_000..], &content[20_000..]);
    assert!(matches!(
        result.into_result(),
        Err(DownloadError::JobFailed {
            failed: 1,
            total:  3,
        })
    ));
}

#[tokio::test]
async fn job_deadline_aborts_stalled_range() {
    let content = sample_content(30_000);
    let server = create_test_server(content, Behavior::StallsAt(20_000));
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("stalled.bin");

    let config = DownloaderConfig::builder()
        .workers(3)
        .job_deadline(SignedDuration::from_millis(750))
        .build();
    let coordinator = DownloadCoordinator::new(config).unwrap();
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert!(result.outcomes[0].is_success());
    assert!(result.outcomes[1].is_success());
    assert!(matches!(
        result.outcomes[2].error,
        Some(DownloadError::DeadlineElapsed { .. })
    ));
    assert!(result.outcomes[2].bytes_written < 10_000);
}

#[tokio::test]
async fn mislabeled_partial_content_fails_the_range() {
    let content = sample_content(9_000);
    let server = create_test_server(content, Behavior::WrongSpan);
    let output_dir = create_temp_dir("out");
    let output_path = output_dir.path().join("mislabeled.bin");

    let coordinator = coordinator(3);
    let job = coordinator.job(get_file_url(&server), &output_path);
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert!(result.outcomes[0].is_success());
    for outcome in &result.outcomes[1..] {
        assert!(matches!(
            outcome.error,
            Some(DownloadError::RangeMismatch { .. })
        ));
        assert_eq!(outcome.bytes_written, 0);
    }
}

#[tokio::test]
async fn unreachable_host_fails_the_probe() {
    let output_dir = create_temp_dir("out");
    let config = DownloaderConfig::builder()
        .connect_timeout(SignedDuration::from_millis(500))
        .build();
    let coordinator = DownloadCoordinator::new(config).unwrap();
    // Port 9 (discard) on loopback is expected to refuse connections.
    let job = coordinator.job("http://127.0.0.1:9/file", output_dir.path().join("x.bin"));
    let result = coordinator.run(&job).await;

    assert_eq!(result.status, JobStatus::PartialFailure);
    assert!(matches!(
        result.overall_error,
        Some(DownloadError::Network { .. })
    ));
}

#[tokio::test]
async fn whole_file_fetch_without_content_length() {
    let content = sample_content(5_000);
    let server = create_test_server(content.clone(), Behavior::NoLength);
    let output_dir = create_temp_dir("whole");

    let fetcher = WholeFileFetcher::new(&DownloaderConfig::default()).unwrap();
    let path = fetcher
        .fetch_whole(&get_file_url(&server), output_dir.path())
        .await
        .unwrap();

    assert_eq!(path, output_dir.path().join("file"));
    assert_eq!(tokio::fs::read(&path).await.unwrap(), content);
}

#[tokio::test]
async fn batch_fetch_reports_each_url() {
    let content = sample_content(2_048);
    let server = create_test_server(content.clone(), Behavior::Ranged);
    let root = create_temp_dir("batch");

    let fetcher = BatchFetcher::new(&DownloaderConfig::default()).unwrap();
    let report = fetcher
        .fetch_all(
            [get_file_url(&server), get_url(&server, "missing")],
            root.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.directory.parent(), Some(root.path()));
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.failed(), 1);

    let saved = report.entries[0].result.as_ref().unwrap();
    assert_eq!(tokio::fs::read(saved).await.unwrap(), content);
    assert!(matches!(
        report.entries[1].result,
        Err(DownloadError::Http { status: 404, .. })
    ));
}

#[tokio::test]
async fn batch_keeps_files_sharing_a_stem_apart() {
    let server = create_static_server();
    let root = create_temp_dir("batch-stem");

    let fetcher = BatchFetcher::new(&DownloaderConfig::default()).unwrap();
    let report = fetcher
        .fetch_all(
            [get_url(&server, "a.jpg"), get_url(&server, "a.png")],
            root.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.failed(), 0);
    let jpg = tokio::fs::read(report.directory.join("a.jpg")).await.unwrap();
    let png = tokio::fs::read(report.directory.join("a.png")).await.unwrap();
    assert_eq!(jpg, vec![b'J'; 64 * 1024]);
    assert_eq!(png, vec![b'P'; 64 * 1024]);
}

#[tokio::test]
async fn broken_whole_file_fetch_leaves_no_files() {
    let server = create_static_server();
    let output_dir = create_temp_dir("whole-broken");

    let fetcher = WholeFileFetcher::new(&DownloaderConfig::default()).unwrap();
    let result = fetcher
        .fetch_whole(&get_url(&server, "broken.bin"), output_dir.path())
        .await;

    assert!(matches!(result, Err(DownloadError::Network { .. })));
    let mut entries = tokio::fs::read_dir(output_dir.path()).await.unwrap();
    assert!(
        entries.next_entry().await.unwrap().is_none(),
        "neither the output nor its temp file should remain"
    );
}
