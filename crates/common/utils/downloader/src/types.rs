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

use std::{fmt, path::PathBuf};

use bon::Builder;
use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::DownloadError;

/// An inclusive byte interval `[start, end]` of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte (inclusive)
    pub start: u64,
    /// Last byte (inclusive)
    pub end:   u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Returns `None` when `start > end`.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Number of bytes covered. Never zero.
    #[must_use]
    pub const fn len(self) -> u64 { self.end - self.start + 1 }

    /// Value for the HTTP `Range` header.
    #[must_use]
    pub fn header_value(self) -> String { format!("bytes={}-{}", self.start, self.end) }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// One chunked download of a single resource into a single file.
#[derive(Debug, Clone, Builder)]
pub struct DownloadJob {
    /// URL to download from
    #[builder(into)]
    pub url:         String,
    /// Requested number of concurrent range workers
    pub workers:     usize,
    /// Path where the reassembled file is written
    #[builder(into)]
    pub output_path: PathBuf,
}

/// What one range worker reports when it terminates.
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Position of the range in the plan
    pub index:         usize,
    /// The range this worker was assigned
    pub range:         ByteRange,
    /// Bytes written to the output file at the range's offsets
    pub bytes_written: u64,
    /// Why the worker stopped, if it did not complete
    pub error:         Option<DownloadError>,
}

impl WorkerOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none() && self.bytes_written == self.range.len()
    }
}

/// Final status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Every range was written in full
    Success,
    /// The job stopped before the download, or at least one range failed
    PartialFailure,
}

/// Lifecycle of a job inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobPhase {
    Init,
    Probing,
    Planning,
    Downloading,
    Awaiting,
    #[strum(to_string = "finished({status})")]
    Finished { status: JobStatus },
}

/// Aggregated result of a job, built only after every worker has reported.
#[derive(Debug)]
pub struct JobResult {
    /// URL that was downloaded
    pub url:                  String,
    /// Path of the output file
    pub output_path:          PathBuf,
    /// Size reported by the probe (0 if the probe failed)
    pub total_bytes_expected: u64,
    /// Sum of `bytes_written` over all outcomes
    pub total_bytes_written:  u64,
    /// One outcome per planned range, in plan order
    pub outcomes:             Vec<WorkerOutcome>,
    /// Error that stopped the job before any worker was spawned
    pub overall_error:        Option<DownloadError>,
    /// Wall-clock time from job start to the last worker reporting
    pub elapsed:              SignedDuration,
    /// Final status
    pub status:               JobStatus,
}

impl JobResult {
    /// A job that never reached the download phase.
    pub(crate) fn aborted(
        job: &DownloadJob,
        total_bytes_expected: u64,
        error: DownloadError,
        elapsed: SignedDuration,
    ) -> Self {
        Self {
            url: job.url.clone(),
            output_path: job.output_path.clone(),
            total_bytes_expected,
            total_bytes_written: 0,
            outcomes: Vec::new(),
            overall_error: Some(error),
            elapsed,
            status: JobStatus::PartialFailure,
        }
    }

    /// Aggregate worker outcomes. Success requires every outcome to be clean
    /// and the written bytes to add up to the probed size.
    pub(crate) fn from_outcomes(
        job: &DownloadJob,
        total_bytes_expected: u64,
        mut outcomes: Vec<WorkerOutcome>,
        elapsed: SignedDuration,
    ) -> Self {
        outcomes.sort_by_key(|o| o.index);
        let total_bytes_written: u64 = outcomes.iter().map(|o| o.bytes_written).sum();
        let status = if !outcomes.is_empty()
            && outcomes.iter().all(WorkerOutcome::is_success)
            && total_bytes_written == total_bytes_expected
        {
            JobStatus::Success
        } else {
            JobStatus::PartialFailure
        };

        Self {
            url: job.url.clone(),
            output_path: job.output_path.clone(),
            total_bytes_expected,
            total_bytes_written,
            outcomes,
            overall_error: None,
            elapsed,
            status,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool { self.status == JobStatus::Success }

    /// Outcomes of the ranges that did not complete, in plan order.
    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Ranges that would have to be fetched again to complete the file.
    #[must_use]
    pub fn failed_ranges(&self) -> Vec<ByteRange> { self.failures().map(|o| o.range).collect() }

    /// Turn a partial failure into an error, for callers that only care
    /// whether the file is complete.
    pub fn into_result(mut self) -> Result<Self, DownloadError> {
        if self.is_success() {
            return Ok(self);
        }
        if let Some(error) = self.overall_error.take() {
            return Err(error);
        }
        Err(DownloadError::JobFailed {
            failed: self.failures().count(),
            total:  self.outcomes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> DownloadJob {
        DownloadJob::builder()
            .url("http://localhost/file")
            .workers(3)
            .output_path("/tmp/out.bin")
            .build()
    }

    fn ok(index: usize, start: u64, end: u64) -> WorkerOutcome {
        let range = ByteRange::new(start, end).unwrap();
        WorkerOutcome {
            index,
            range,
            bytes_written: range.len(),
            error: None,
        }
    }

    #[test]
    fn byte_range_rejects_inverted_bounds() {
        assert!(ByteRange::new(5, 4).is_none());
        let single = ByteRange::new(7, 7).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single.header_value(), "bytes=7-7");
    }

    #[test]
    fn all_clean_outcomes_make_success() {
        let outcomes = vec![ok(2, 20, 29), ok(0, 0, 9), ok(1, 10, 19)];
        let result = JobResult::from_outcomes(&job(), 30, outcomes, SignedDuration::ZERO);
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.total_bytes_written, 30);
        let order: Vec<_> = result.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(result.failed_ranges().is_empty());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn one_failed_worker_makes_partial_failure() {
        let range = ByteRange::new(10, 19).unwrap();
        let failed = WorkerOutcome {
            index: 1,
            range,
            bytes_written: 4,
            error: Some(DownloadError::Truncated {
                range,
                expected: 10,
                actual: 4,
            }),
        };
        let outcomes = vec![ok(0, 0, 9), failed, ok(2, 20, 29)];
        let result = JobResult::from_outcomes(&job(), 30, outcomes, SignedDuration::ZERO);
        assert_eq!(result.status, JobStatus::PartialFailure);
        assert_eq!(result.failed_ranges(), vec![range]);
        assert_eq!(
            result.outcomes[1].error.as_ref().and_then(DownloadError::range),
            Some(range)
        );
        assert!(matches!(
            result.into_result(),
            Err(DownloadError::JobFailed {
                failed: 1,
                total:  3,
            })
        ));
    }

    #[test]
    fn short_total_is_not_success_even_without_errors() {
        let outcomes = vec![ok(0, 0, 9)];
        let result = JobResult::from_outcomes(&job(), 30, outcomes, SignedDuration::ZERO);
        assert_eq!(result.status, JobStatus::PartialFailure);
    }

    #[test]
    fn aborted_job_carries_overall_error() {
        let error = DownloadError::SizeUnavailable {
            url:    "http://localhost/file".to_string(),
            reason: "no Content-Length header".to_string(),
        };
        let result = JobResult::aborted(&job(), 0, error, SignedDuration::ZERO);
        assert_eq!(result.status, JobStatus::PartialFailure);
        assert!(result.outcomes.is_empty());
        assert!(matches!(
            result.into_result(),
            Err(DownloadError::SizeUnavailable { .. })
        ));
    }

    #[test]
    fn phase_display() {
        assert_eq!(JobPhase::Probing.to_string(), "probing");
        assert_eq!(
            JobPhase::Finished {
                status: JobStatus::PartialFailure,
            }
            .to_string(),
            "finished(partial_failure)"
        );
    }
}
