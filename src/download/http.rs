// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plain HTTP GETs, behind a trait so the archive code can be tested offline.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use log::trace;

use super::DownloadError;

const USER_AGENT: &str = concat!("autorxte/", env!("CARGO_PKG_VERSION"));

pub trait HttpClient: Send + Sync {
    /// GET `url` and return the whole body.
    fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError>;

    /// GET `url` into `dest`, returning the number of bytes written. The
    /// default buffers the body in memory.
    fn get_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let body = self.get(url)?;
        let mut f = File::create(dest)?;
        f.write_all(&body)?;
        Ok(body.len() as u64)
    }
}

/// The real thing, on top of `reqwest`'s blocking client.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DownloadError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn send(&self, url: &str) -> Result<reqwest::blocking::Response, DownloadError> {
        trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let bytes = self
            .send(url)?
            .bytes()
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    // Streams the body rather than holding a whole FITS file in memory.
    fn get_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let mut response = self.send(url)?;
        let mut f = File::create(dest)?;
        let n = response
            .copy_to(&mut f)
            .map_err(|e| DownloadError::Http(e.to_string()))?;
        Ok(n)
    }
}

/// Build `base?k=v&...` with the values percent-encoded.
pub fn url_with_params(base: &str, params: &[(&str, &str)]) -> Result<String, DownloadError> {
    reqwest::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| DownloadError::InvalidArgument(format!("Bad URL {}: {}", base, e)))
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Answers GETs from canned bodies, picking the longest registered URL
    /// prefix that matches. Unknown URLs get a 404.
    #[derive(Default)]
    pub struct MockClient {
        pub responses: Vec<(String, Vec<u8>)>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockClient {
        pub fn with(mut self, url_prefix: &str, body: &[u8]) -> Self {
            self.responses.push((url_prefix.to_string(), body.to_vec()));
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpClient for MockClient {
        fn get(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.responses
                .iter()
                .filter(|(p, _)| url.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len())
                .map(|(_, b)| b.clone())
                .ok_or_else(|| DownloadError::Status {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_with_params() {
        let url = url_with_params("https://example.com/q", &[("name", "GX 339-4"), ("x", "a&b")]).unwrap();
        assert_eq!(url, "https://example.com/q?name=GX+339-4&x=a%26b");
    }
}
