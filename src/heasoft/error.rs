// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Error handling for HEASoft tool invocations.
 */

use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeasoftError {
    /// The tool isn't on the PATH.
    #[error("HEASoft tool '{0}' not found. Is HEASoft installed and initialised? Try running: heainit")]
    ToolNotFound(String),

    /// The tool ran, but exited unsuccessfully.
    #[error("{tool} failed ({status}): {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    /// An IO error.
    #[error("{0}")]
    IO(#[from] std::io::Error),
}
