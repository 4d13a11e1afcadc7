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

use reqwest::{
    Client, RequestBuilder, Url,
    header::{HeaderMap, HeaderName, HeaderValue, RANGE},
};

use crate::error::DownloadError;

/// URL plus caller-supplied headers, reused for every request of a download.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url:     Url,
    headers: HeaderMap,
}

impl RequestTemplate {
    /// Parse `url` and `headers`, rejecting anything that cannot go on the
    /// wire.
    pub fn new(url: &str, headers: &[(String, String)]) -> Result<Self, DownloadError> {
        let url = Url::parse(url).map_err(|e| DownloadError::Planning {
            message: format!("invalid URL {url}: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::Planning {
                message: format!("unsupported URL scheme: {}", url.scheme()),
            });
        }

        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| DownloadError::Planning {
                    message: format!("invalid header name: {name}"),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| DownloadError::Planning {
                    message: format!("invalid value for header {name}"),
                })?;
            map.append(header_name, header_value);
        }

        Ok(Self { url, headers: map })
    }

    #[must_use]
    pub const fn url(&self) -> &Url { &self.url }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap { &self.headers }

    pub fn head(&self, client: &Client) -> RequestBuilder {
        client.head(self.url.clone()).headers(self.headers.clone())
    }

    pub fn get(&self, client: &Client) -> RequestBuilder {
        client.get(self.url.clone()).headers(self.headers.clone())
    }

    /// GET carrying `Range: <range>`, replacing any caller-supplied range.
    pub fn ranged(&self, client: &Client, range: &str) -> RequestBuilder {
        let mut headers = self.headers.clone();
        headers.remove(RANGE);
        let builder = client.get(self.url.clone()).headers(headers);
        builder.header(RANGE, range)
    }
}
