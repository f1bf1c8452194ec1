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
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use jiff::Timestamp;
use snafu::ResultExt;
use tokio::{fs, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::DownloaderConfig,
    error::{DownloadError, OutputPrepareSnafu},
    planner::plan_ranges,
    probe::ResourceProbe,
    range_worker::RangeWorker,
    types::{ByteRange, DownloadJob, JobPhase, JobResult, WorkerOutcome},
};

/// A spawned worker together with what the coordinator needs to report on
/// it if the task never returns an outcome.
struct PendingWorker {
    index:    usize,
    range:    ByteRange,
    progress: Arc<AtomicU64>,
    handle:   JoinHandle<WorkerOutcome>,
}

/// Drives one job through probe, plan, parallel range download and
/// aggregation.
pub struct DownloadCoordinator {
    config:   DownloaderConfig,
    client:   reqwest::Client,
    probe:    ResourceProbe,
    deadline: Option<Duration>,
}

impl DownloadCoordinator {
    /// Create a coordinator, validating the configuration first.
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let client = config.build_client()?;
        let probe = ResourceProbe::new(client.clone());
        let deadline = config.job_deadline_std()?;

        Ok(Self {
            config,
            client,
            probe,
            deadline,
        })
    }

    /// A job for `url` using the configured worker count.
    pub fn job(&self, url: impl Into<String>, output_path: impl Into<PathBuf>) -> DownloadJob {
        DownloadJob::builder()
            .url(url)
            .workers(self.config.workers)
            .output_path(output_path)
            .build()
    }

    /// Run a job to the end.
    ///
    /// Never returns early while a worker is still running: the result is
    /// built only after every spawned worker has reported (or, with a job
    /// deadline, has been aborted).
    pub async fn run(&self, job: &DownloadJob) -> JobResult {
        let started = Timestamp::now();
        let mut phase = JobPhase::Init;
        info!(
            url = %job.url,
            workers = job.workers,
            output = %job.output_path.display(),
            "starting download job"
        );

        advance(&mut phase, JobPhase::Probing, job);
        let info = match self.probe.probe(&job.url).await {
            Ok(info) => info,
            Err(e) => return abort(job, &mut phase, 0, e, started),
        };
        debug!(url = %job.url, size = info.size, supports_range = info.supports_range, "probed");

        advance(&mut phase, JobPhase::Planning, job);
        let ranges = match plan_ranges(info.size, job.workers) {
            Ok(ranges) => ranges,
            Err(e) => return abort(job, &mut phase, info.size, e, started),
        };

        advance(&mut phase, JobPhase::Downloading, job);
        if let Err(e) = preallocate(&job.output_path, info.size).await {
            return abort(job, &mut phase, info.size, e, started);
        }
        let pending = self.spawn_workers(job, &ranges);

        advance(&mut phase, JobPhase::Awaiting, job);
        let outcomes = collect_outcomes(pending, self.deadline).await;

        let elapsed = Timestamp::now().duration_since(started);
        let result = JobResult::from_outcomes(job, info.size, outcomes, elapsed);
        advance(&mut phase, JobPhase::Finished { status: result.status }, job);

        if result.is_success() {
            info!(
                url = %job.url,
                bytes = result.total_bytes_written,
                elapsed = %result.elapsed,
                "download job succeeded"
            );
        } else {
            for failure in result.failures() {
                warn!(
                    url = %job.url,
                    index = failure.index,
                    range = %failure.range,
                    bytes_written = failure.bytes_written,
                    error = ?failure.error.as_ref().map(ToString::to_string),
                    "range did not complete"
                );
            }
            warn!(
                url = %job.url,
                expected = result.total_bytes_expected,
                written = result.total_bytes_written,
                elapsed = %result.elapsed,
                "download job partially failed"
            );
        }

        result
    }

    /// Spawn one task per range. Nothing but the plan entry, the URL and the
    /// output path is handed to a worker.
    fn spawn_workers(&self, job: &DownloadJob, ranges: &[ByteRange]) -> Vec<PendingWorker> {
        let url: Arc<str> = Arc::from(job.url.as_str());
        let output_path = Arc::new(job.output_path.clone());
        let chunk_size = self.config.chunk_size.as_usize();

        ranges
            .iter()
            .enumerate()
            .map(|(index, &range)| {
                let worker = RangeWorker::new(
                    self.client.clone(),
                    Arc::clone(&url),
                    Arc::clone(&output_path),
                    chunk_size,
                );
                let progress = Arc::new(AtomicU64::new(0));
                let handle = tokio::spawn(worker.run(index, range, Arc::clone(&progress)));

                PendingWorker {
                    index,
                    range,
                    progress,
                    handle,
                }
            })
            .collect()
    }
}

/// Finish a job that never got its workers running.
fn abort(
    job: &DownloadJob,
    phase: &mut JobPhase,
    total_bytes_expected: u64,
    error: DownloadError,
    started: Timestamp,
) -> JobResult {
    warn!(url = %job.url, phase = %phase, error = %error, "download job stopped");
    let result = JobResult::aborted(
        job,
        total_bytes_expected,
        error,
        Timestamp::now().duration_since(started),
    );
    advance(phase, JobPhase::Finished { status: result.status }, job);
    result
}

fn advance(phase: &mut JobPhase, next: JobPhase, job: &DownloadJob) {
    debug!(url = %job.url, from = %phase, to = %next, "job phase");
    *phase = next;
}

/// Size the output file to its final length before any worker writes, so
/// that concurrent writers never grow the file.
async fn preallocate(path: &Path, size: u64) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .context(OutputPrepareSnafu { path })?;
    }

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .context(OutputPrepareSnafu { path })?;
    file.set_len(size)
        .await
        .context(OutputPrepareSnafu { path })?;
    file.sync_all()
        .await
        .context(OutputPrepareSnafu { path })?;

    Ok(())
}

/// Wait for every worker of the job. With a deadline, workers still running
/// when it passes are aborted and reported with the bytes they managed to
/// write.
async fn collect_outcomes(
    pending: Vec<PendingWorker>,
    deadline: Option<Duration>,
) -> Vec<WorkerOutcome> {
    let deadline = deadline.map(|d| Instant::now() + d);
    let mut outcomes = Vec::with_capacity(pending.len());

    for worker in pending {
        let PendingWorker {
            index,
            range,
            progress,
            mut handle,
        } = worker;

        let joined = match deadline {
            Some(deadline) => {
                if let Ok(joined) = tokio::time::timeout_at(deadline, &mut handle).await {
                    joined
                } else {
                    handle.abort();
                    outcomes.push(WorkerOutcome {
                        index,
                        range,
                        bytes_written: progress.load(Ordering::Acquire),
                        error: Some(DownloadError::DeadlineElapsed { range }),
                    });
                    continue;
                }
            }
            None => handle.await,
        };

        let outcome = joined.unwrap_or_else(|e| WorkerOutcome {
            index,
            range,
            bytes_written: progress.load(Ordering::Acquire),
            error: Some(DownloadError::WorkerPanic {
                range,
                message: e.to_string(),
            }),
        });
        outcomes.push(outcome);
    }

    outcomes
}
