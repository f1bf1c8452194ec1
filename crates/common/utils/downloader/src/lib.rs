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

//! Parallel ranged HTTP downloads into a single file.
//!
//! A [`DownloadCoordinator`] probes the resource size, splits it into
//! contiguous byte ranges, and runs one [`RangeWorker`] task per range. Every
//! worker writes directly at its own offsets of the preallocated output file,
//! so no merge pass is needed. Per-range failures are collected into the
//! [`JobResult`] instead of being thrown.
//!
//! ```rust,no_run
//! use rangefetch_downloader::{DownloadCoordinator, DownloaderConfig};
//!
//! # async fn run() -> Result<(), rangefetch_downloader::DownloadError> {
//! let coordinator = DownloadCoordinator::new(DownloaderConfig::default())?;
//! let job = coordinator.job("https://example.com/big.iso", "/tmp/big.iso");
//! let result = coordinator.run(&job).await;
//! for failure in result.failures() {
//!     eprintln!("range {} failed: {:?}", failure.range, failure.error);
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
mod coordinator;
mod error;
mod planner;
mod probe;
mod range_worker;
mod types;
mod whole_file;

pub use batch::{BatchEntry, BatchFetcher, BatchReport};
pub use config::DownloaderConfig;
pub use coordinator::DownloadCoordinator;
pub use error::DownloadError;
pub use planner::{effective_workers, plan_ranges};
pub use probe::{ResourceInfo, ResourceProbe};
pub use range_worker::RangeWorker;
pub use types::{ByteRange, DownloadJob, JobPhase, JobResult, JobStatus, WorkerOutcome};
pub use whole_file::{WholeFileFetcher, file_name_from_url};
