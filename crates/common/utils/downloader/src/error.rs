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

use std::path::PathBuf;

use snafu::Snafu;

use crate::types::ByteRange;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Invalid downloader configuration: {message}"))]
    Config { message: String },

    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },

    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    Http { status: u16, url: String },

    #[snafu(display("Size of {url} is unavailable: {reason}"))]
    SizeUnavailable { url: String, reason: String },

    #[snafu(display("Cannot plan download: {message}"))]
    Planning { message: String },

    #[snafu(display("Failed to prepare output file {}: {source}", path.display()))]
    OutputPrepare {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Connection error on range {range}: {source}"))]
    RangeConnection {
        range:  ByteRange,
        source: reqwest::Error,
    },

    #[snafu(display("Server answered range {range} with status {status} instead of partial content"))]
    RangeNotSupported { range: ByteRange, status: u16 },

    #[snafu(display("Server answered range {range} with {content_range:?}"))]
    RangeMismatch {
        range:         ByteRange,
        content_range: String,
    },

    #[snafu(display("Write error on range {range}: {source}"))]
    RangeWrite {
        range:  ByteRange,
        source: std::io::Error,
    },

    #[snafu(display("Range {range} ended early: expected {expected} bytes, got {actual}"))]
    Truncated {
        range:    ByteRange,
        expected: u64,
        actual:   u64,
    },

    #[snafu(display("Worker for range {range} panicked: {message}"))]
    WorkerPanic { range: ByteRange, message: String },

    #[snafu(display("Job deadline elapsed before range {range} finished"))]
    DeadlineElapsed { range: ByteRange },

    #[snafu(display("File write error: {source}"))]
    FileWrite { source: std::io::Error },

    #[snafu(display("Fetch task for {url} panicked: {message}"))]
    TaskPanic { url: String, message: String },

    #[snafu(display("{failed} of {total} ranges failed"))]
    JobFailed { failed: usize, total: usize },
}

impl DownloadError {
    /// The byte range this error is attributed to, if it came from a worker.
    #[must_use]
    pub const fn range(&self) -> Option<ByteRange> {
        match self {
            Self::RangeConnection { range, .. }
            | Self::RangeNotSupported { range, .. }
            | Self::RangeMismatch { range, .. }
            | Self::RangeWrite { range, .. }
            | Self::Truncated { range, .. }
            | Self::WorkerPanic { range, .. }
            | Self::DeadlineElapsed { range } => Some(*range),
            _ => None,
        }
    }
}
