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
    io::SeekFrom,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use reqwest::{StatusCode, header};
use snafu::{ResultExt, ensure};
use tokio::{
    fs::OpenOptions,
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::{
    error::{
        DownloadError, HttpSnafu, RangeConnectionSnafu, RangeMismatchSnafu,
        RangeNotSupportedSnafu, RangeWriteSnafu, TruncatedSnafu,
    },
    types::{ByteRange, WorkerOutcome},
};

/// Downloads one byte range straight into its offsets of the output file.
///
/// Each worker opens its own connection and its own file handle; both are
/// dropped when the worker returns, whatever the outcome.
pub struct RangeWorker {
    client:      reqwest::Client,
    url:         Arc<str>,
    output_path: Arc<PathBuf>,
    chunk_size:  usize,
}

impl RangeWorker {
    pub const fn new(
        client: reqwest::Client,
        url: Arc<str>,
        output_path: Arc<PathBuf>,
        chunk_size: usize,
    ) -> Self {
        Self {
            client,
            url,
            output_path,
            chunk_size,
        }
    }

    /// Run the worker to completion. Never fails: errors end up in the
    /// returned outcome. `progress` tracks bytes written so far.
    pub async fn run(self, index: usize, range: ByteRange, progress: Arc<AtomicU64>) -> WorkerOutcome {
        let result = self.transfer(range, &progress).await;
        let bytes_written = progress.load(Ordering::Acquire);

        match &result {
            Ok(()) => debug!(index, %range, bytes_written, "range complete"),
            Err(e) => warn!(index, %range, bytes_written, error = %e, "range failed"),
        }

        WorkerOutcome {
            index,
            range,
            bytes_written,
            error: result.err(),
        }
    }

    async fn transfer(&self, range: ByteRange, progress: &AtomicU64) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(&*self.url)
            .header(header::CONNECTION, "keep-alive")
            .header(header::RANGE, range.header_value())
            .send()
            .await
            .context(RangeConnectionSnafu { range })?;

        let status = response.status();
        ensure!(
            status.is_success(),
            HttpSnafu {
                status: status.as_u16(),
                url:    &*self.url,
            }
        );
        // A full-body answer only lines up with the file when the range
        // starts at zero; the length cap below trims the rest.
        ensure!(
            status == StatusCode::PARTIAL_CONTENT || (status == StatusCode::OK && range.start == 0),
            RangeNotSupportedSnafu {
                range,
                status: status.as_u16(),
            }
        );

        if status == StatusCode::PARTIAL_CONTENT
            && let Some(value) = response.headers().get(header::CONTENT_RANGE)
        {
            let served = value.to_str().ok().and_then(parse_content_range);
            ensure!(
                served == Some((range.start, range.end)),
                RangeMismatchSnafu {
                    range,
                    content_range: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                }
            );
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.output_path.as_path())
            .await
            .context(RangeWriteSnafu { range })?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .context(RangeWriteSnafu { range })?;

        let limit = range.len();
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while written < limit {
            let Some(next) = stream.next().await else {
                break;
            };
            let bytes = next.context(RangeConnectionSnafu { range })?;

            let remaining = limit - written;
            let take = usize::try_from(remaining).map_or(bytes.len(), |r| r.min(bytes.len()));

            for piece in bytes[..take].chunks(self.chunk_size) {
                file.write_all(piece)
                    .await
                    .context(RangeWriteSnafu { range })?;
                written += piece.len() as u64;
                progress.fetch_add(piece.len() as u64, Ordering::AcqRel);
            }
        }

        file.flush().await.context(RangeWriteSnafu { range })?;
        file.sync_data().await.context(RangeWriteSnafu { range })?;

        ensure!(
            written == limit,
            TruncatedSnafu {
                range,
                expected: limit,
                actual:   written,
            }
        );

        Ok(())
    }
}

/// Start and end of a `Content-Range: bytes <start>-<end>/<total>` value.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let span = value.trim().strip_prefix("bytes ")?;
    let (span, _total) = span.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
