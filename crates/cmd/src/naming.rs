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

//! Destination naming for command-line downloads.

use std::path::{Path, PathBuf};

use parfetch_downloader::{RequestTemplate, Url, parse_content_disposition};
use tracing::debug;

/// Used when neither the URL nor the server suggests a name.
pub const FALLBACK_FILE_NAME: &str = "parfetch.output";

/// Prefix `https://` when the argument carries no scheme.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

/// Last path segment of `url`, when it looks like a file name.
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    Path::new(segment)
        .extension()
        .is_some_and(|ext| !ext.is_empty())
        .then(|| segment.to_string())
}

/// Ask the server for a `Content-Disposition` file name with a `HEAD`
/// request. Any failure just means there is no suggestion.
async fn file_name_from_server(
    client: &reqwest::Client,
    request: &RequestTemplate,
) -> Option<String> {
    let response = match request.head(client).send().await {
        Ok(response) => response,
        Err(error) => {
            debug!(%error, "HEAD for file name failed");
            return None;
        }
    };
    response
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
}

/// Pick the destination for one URL.
///
/// Order: explicit `output`, the URL's last path segment when it has an
/// extension, the server's `Content-Disposition` name, then
/// [`FALLBACK_FILE_NAME`]. The chosen name is placed under `dir` when given.
pub async fn resolve_output(
    client: &reqwest::Client,
    request: &RequestTemplate,
    output: Option<&Path>,
    dir: Option<&Path>,
) -> PathBuf {
    let path = match output {
        Some(output) => output.to_path_buf(),
        None => {
            let name = match file_name_from_url(request.url()) {
                Some(name) => name,
                None => file_name_from_server(client, request)
                    .await
                    .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
            };
            PathBuf::from(name)
        }
    };
    match dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}
