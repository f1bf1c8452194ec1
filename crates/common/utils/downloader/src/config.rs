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

use std::time::Duration;

use bon::Builder;
use jiff::SignedDuration;
use rangefetch_base::readable_size::ReadableSize;
use serde::Deserialize;
use smart_default::SmartDefault;
use snafu::{ResultExt, ensure};

use crate::error::{ClientBuildSnafu, ConfigSnafu, DownloadError};

/// Configuration for the downloader
#[derive(Debug, Clone, SmartDefault, Builder, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Number of concurrent range workers for jobs built from this config
    /// (default: 4)
    #[default = 4]
    #[builder(default = 4)]
    pub workers: usize,

    /// Connect timeout applied to every connection (default: 5s)
    #[default(SignedDuration::from_secs(5))]
    #[builder(default = SignedDuration::from_secs(5))]
    pub connect_timeout: SignedDuration,

    /// Upper bound for a single file write while streaming (default: 8KiB)
    #[default(ReadableSize::kb(8))]
    #[builder(default = ReadableSize::kb(8))]
    pub chunk_size: ReadableSize,

    /// Deadline for a whole job. When it elapses every unfinished worker is
    /// aborted and reported as failed. No deadline by default.
    pub job_deadline: Option<SignedDuration>,

    /// Custom User-Agent header
    pub user_agent: Option<String>,
}

impl DownloaderConfig {
    /// Reject values that would make a job meaningless.
    pub fn validate(&self) -> Result<(), DownloadError> {
        ensure!(
            self.workers >= 1,
            ConfigSnafu {
                message: "workers must be at least 1",
            }
        );
        ensure!(
            self.chunk_size.as_bytes() > 0,
            ConfigSnafu {
                message: "chunk_size must be greater than zero",
            }
        );
        to_std(self.connect_timeout, "connect_timeout")?;
        if let Some(deadline) = self.job_deadline {
            to_std(deadline, "job_deadline")?;
        }
        Ok(())
    }

    /// Job deadline as a std duration, once validated.
    pub(crate) fn job_deadline_std(&self) -> Result<Option<Duration>, DownloadError> {
        self.job_deadline
            .map(|deadline| to_std(deadline, "job_deadline"))
            .transpose()
    }

    /// Build the HTTP client shared by the probe and the workers of one
    /// coordinator.
    ///
    /// Idle pooling is disabled, so every request (the probe and each range)
    /// goes out on its own connection.
    pub(crate) fn build_client(&self) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(to_std(self.connect_timeout, "connect_timeout")?)
            .pool_max_idle_per_host(0);

        if let Some(ref ua) = self.user_agent {
            builder = builder.user_agent(ua);
        }

        builder.build().context(ClientBuildSnafu)
    }
}

fn to_std(duration: SignedDuration, field: &str) -> Result<Duration, DownloadError> {
    Duration::try_from(duration).map_err(|_| DownloadError::Config {
        message: format!("{field} must not be negative, got {duration}"),
    })
}
