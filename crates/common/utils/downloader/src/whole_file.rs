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
    ffi::OsString,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use jiff::Timestamp;
use snafu::{ResultExt, ensure};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;

use crate::{
    config::DownloaderConfig,
    error::{DownloadError, FileWriteSnafu, HttpSnafu, NetworkSnafu},
};

/// Name to save a URL under: its last path segment, or `<unix-millis>.X`
/// when the URL has no usable segment.
#[must_use]
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path
        .rfind('/')
        .filter(|&index| index > 0)
        .map(|index| &path[index + 1..])
        .filter(|name| !name.trim().is_empty());

    name.map_or_else(
        || format!("{}.X", Timestamp::now().as_millisecond()),
        str::to_string,
    )
}

/// Plain sequential fetch of a whole resource, for cases where a ranged
/// download is not warranted.
pub struct WholeFileFetcher {
    client:     reqwest::Client,
    chunk_size: usize,
}

impl WholeFileFetcher {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        Ok(Self {
            client:     config.build_client()?,
            chunk_size: config.chunk_size.as_usize(),
        })
    }

    /// Fetch `url` into `destination_dir`, named after the URL. Returns the
    /// path of the written file.
    pub async fn fetch_whole(
        &self,
        url: &str,
        destination_dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let output_path = destination_dir.join(file_name_from_url(url));
        self.fetch_to(url, &output_path).await?;
        Ok(output_path)
    }

    /// Fetch `url` into exactly `output_path`. Returns the number of bytes
    /// written.
    ///
    /// The body goes to `<file name>.download` next to the output first and
    /// is renamed into place once complete; on failure the temp file is
    /// removed.
    pub async fn fetch_to(&self, url: &str, output_path: &Path) -> Result<u64, DownloadError> {
        let response = self.client.get(url).send().await.context(NetworkSnafu)?;

        ensure!(
            response.status().is_success(),
            HttpSnafu {
                status: response.status().as_u16(),
                url,
            }
        );

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await.context(FileWriteSnafu)?;
        }

        let temp_path = temp_path_for(output_path);
        let total_size = match self.stream_to(response, &temp_path).await {
            Ok(total_size) => total_size,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path).await {
                    debug!(path = %temp_path.display(), error = %cleanup, "temp file not removed");
                }
                return Err(e);
            }
        };

        fs::rename(&temp_path, output_path)
            .await
            .context(FileWriteSnafu)?;

        debug!(url, path = %output_path.display(), bytes = total_size, "fetched whole file");
        Ok(total_size)
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        temp_path: &Path,
    ) -> Result<u64, DownloadError> {
        let mut file = File::create(temp_path).await.context(FileWriteSnafu)?;
        let mut total_size = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(next) = stream.next().await {
            let bytes = next.context(NetworkSnafu)?;
            for piece in bytes.chunks(self.chunk_size) {
                file.write_all(piece).await.context(FileWriteSnafu)?;
                total_size += piece.len() as u64;
            }
        }

        file.sync_all().await.context(FileWriteSnafu)?;
        Ok(total_size)
    }
}

/// `<dir>/<file name>.download`, keeping the full name so that files sharing a
/// stem never share a temp file.
fn temp_path_for(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".download");
    output_path.with_file_name(name)
}
