// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Error handling for archive searches and downloads.
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// The request never got a response.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered, but not with a success.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A source name or position that couldn't be turned into coordinates.
    #[error("Could not resolve '{0}' to a sky position")]
    Resolve(String),

    /// A response we couldn't make sense of.
    #[error("Unexpected response: {0}")]
    BadResponse(String),

    #[error("No observations found for {0}")]
    NoObservations(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    IO(#[from] std::io::Error),
}
