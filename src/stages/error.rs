// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Error handling for pipeline stages.
 */

use std::path::PathBuf;

use thiserror::Error;

use crate::fits::FitsError;
use crate::heasoft::HeasoftError;

#[derive(Error, Debug)]
pub enum StageError {
    /// A file a task needs isn't there.
    #[error("Missing input: {0}")]
    MissingInput(PathBuf),

    /// The stage was asked to do something that can't be done.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Heasoft(#[from] HeasoftError),

    #[error("{0}")]
    Fits(#[from] FitsError),

    #[error("{0}")]
    Glob(#[from] globset::Error),

    #[error("{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Csv(#[from] csv::Error),

    /// An IO error.
    #[error("{0}")]
    IO(#[from] std::io::Error),
}
