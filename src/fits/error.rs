// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Error handling for fits functions.
 */

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitsError {
    /// The file to be read doesn't exist.
    #[error("FITS file not found: {0}")]
    NotFound(PathBuf),

    /// The HDU expected to hold a table holds something else.
    #[error("{file}: HDU {hdu} is not a table")]
    NotATable { file: PathBuf, hdu: usize },

    /// An error associated the fitsio-crate.
    #[error("{0}")]
    Fitsio(#[from] fitsio::errors::Error),

    /// An IO error.
    #[error("{0}")]
    IO(#[from] std::io::Error),
}
