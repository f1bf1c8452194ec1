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

use reqwest::header::{self, HeaderMap};
use snafu::{ResultExt, ensure};

use crate::error::{DownloadError, HttpSnafu, NetworkSnafu, SizeUnavailableSnafu};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Total length of the resource in bytes, always positive
    pub size:           u64,
    /// Whether the server advertised `Accept-Ranges: bytes`
    pub supports_range: bool,
}

pub struct ResourceProbe {
    client: reqwest::Client,
}

impl ResourceProbe {
    pub const fn new(client: reqwest::Client) -> Self { Self { client } }

    /// Learn the total length of the resource.
    ///
    /// Sends a plain GET and reads `Content-Length` from the response head.
    /// The response is dropped without reading the body, which closes the
    /// connection.
    pub async fn probe(&self, url: &str) -> Result<ResourceInfo, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(header::CONNECTION, "keep-alive")
            .send()
            .await
            .context(NetworkSnafu)?;

        let status = response.status();
        ensure!(
            status.is_success(),
            HttpSnafu {
                status: status.as_u16(),
                url,
            }
        );

        let size = declared_length(url, response.headers())?;
        let supports_range = response
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));

        drop(response);

        Ok(ResourceInfo {
            size,
            supports_range,
        })
    }
}

fn declared_length(url: &str, headers: &HeaderMap) -> Result<u64, DownloadError> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| unavailable(url, "no Content-Length header"))?;
    let text = raw
        .to_str()
        .map_err(|_| unavailable(url, "Content-Length is not valid text"))?;
    let length: i64 = text
        .trim()
        .parse()
        .map_err(|_| unavailable(url, &format!("unparsable Content-Length {text:?}")))?;

    ensure!(
        length > 0,
        SizeUnavailableSnafu {
            url,
            reason: format!("non-positive Content-Length {length}"),
        }
    );

    Ok(length.unsigned_abs())
}

fn unavailable(url: &str, reason: &str) -> DownloadError {
    DownloadError::SizeUnavailable {
        url:    url.to_string(),
        reason: reason.to_string(),
    }
}
