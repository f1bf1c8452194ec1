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

use snafu::ensure;

use crate::{
    error::{DownloadError, PlanningSnafu},
    types::ByteRange,
};

/// Number of workers actually used for a resource of `total_size` bytes.
///
/// Capped at `total_size` so that no worker gets an empty range.
#[must_use]
pub fn effective_workers(total_size: u64, workers: usize) -> usize {
    usize::try_from(total_size).map_or(workers, |size| workers.min(size))
}

/// Split `[0, total_size - 1]` into contiguous, non-overlapping ranges, one
/// per worker.
///
/// Every range but the last is `total_size / workers` bytes long; the last
/// one absorbs the remainder of the division.
pub fn plan_ranges(total_size: u64, workers: usize) -> Result<Vec<ByteRange>, DownloadError> {
    ensure!(
        total_size > 0,
        PlanningSnafu {
            message: "total size must be positive",
        }
    );
    ensure!(
        workers >= 1,
        PlanningSnafu {
            message: "at least one worker is required",
        }
    );

    let workers = effective_workers(total_size, workers);
    let count = workers as u64;
    let block_size = total_size / count;

    let ranges = (0..count)
        .map(|i| {
            let start = i * block_size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                (i + 1) * block_size - 1
            };
            ByteRange { start, end }
        })
        .collect();

    Ok(ranges)
}
