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
    sync::Arc,
};

use jiff::Timestamp;
use snafu::ResultExt;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    config::DownloaderConfig,
    error::{DownloadError, FileWriteSnafu},
    whole_file::WholeFileFetcher,
};

/// Result of fetching one URL of a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub url:    String,
    pub result: Result<PathBuf, DownloadError>,
}

/// Everything a batch produced, in the order the URLs were given.
#[derive(Debug)]
pub struct BatchReport {
    /// Directory all files were written into
    pub directory: PathBuf,
    pub entries:   Vec<BatchEntry>,
}

impl BatchReport {
    #[must_use]
    pub fn failed(&self) -> usize { self.entries.iter().filter(|e| e.result.is_err()).count() }
}

/// Fetches a list of whole files concurrently into a fresh directory.
pub struct BatchFetcher {
    fetcher: Arc<WholeFileFetcher>,
}

impl BatchFetcher {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Ok(Self {
            fetcher: Arc::new(WholeFileFetcher::new(config)?),
        })
    }

    /// Create `root_dir/<unix-millis>/` and fetch every URL into it, one task
    /// per URL. A failing URL does not stop the others.
    pub async fn fetch_all<I, S>(&self, urls: I, root_dir: &Path) -> Result<BatchReport, DownloadError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = root_dir.join(Timestamp::now().as_millisecond().to_string());
        fs::create_dir_all(&directory)
            .await
            .context(FileWriteSnafu)?;

        let handles: Vec<_> = urls
            .into_iter()
            .map(Into::into)
            .map(|url: String| {
                let fetcher = Arc::clone(&self.fetcher);
                let directory = directory.clone();
                let task_url = url.clone();
                let handle =
                    tokio::spawn(async move { fetcher.fetch_whole(&task_url, &directory).await });
                (url, handle)
            })
            .collect();

        let mut entries = Vec::with_capacity(handles.len());
        for (url, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DownloadError::TaskPanic {
                    url:     url.clone(),
                    message: e.to_string(),
                }),
            };
            if let Err(ref e) = result {
                warn!(url = %url, error = %e, "batch entry failed");
            }
            entries.push(BatchEntry { url, result });
        }

        let report = BatchReport { directory, entries };
        info!(
            directory = %report.directory.display(),
            total = report.entries.len(),
            failed = report.failed(),
            "batch finished"
        );
        Ok(report)
    }
}
