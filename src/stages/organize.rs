// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Move each observation's `fits_files.god` next to its results.

use std::path::Path;

use log::{debug, info, warn};

use super::StageError;
use crate::layout::{dir_name, ensure_analysis_dir, observation_dir_for, results_dirs, FITS_GOD_FILE};

/// Move (or copy) `<obsid>/fits_files.god` to `<obsid>-results/Analysis/`
/// for every results directory under `root`. Returns how many files were
/// organised.
pub fn organize_fits_files(root: &Path, move_mode: bool, overwrite: bool) -> Result<usize, StageError> {
    let mut count = 0;
    for results in results_dirs(root)? {
        let analysis = ensure_analysis_dir(&results)?;
        let observation = match observation_dir_for(&results) {
            Some(o) if o.is_dir() => o,
            _ => {
                warn!("No observation directory for {}", dir_name(&results));
                continue;
            }
        };

        let src = observation.join(FITS_GOD_FILE);
        if !src.exists() {
            warn!("No {} in {}", FITS_GOD_FILE, observation.display());
            continue;
        }
        let dst = analysis.join(FITS_GOD_FILE);
        if dst.exists() && !overwrite {
            debug!("{} already exists; keeping it", dst.display());
            continue;
        }

        if move_mode {
            // rename fails across filesystems; fall back to copy + delete.
            if std::fs::rename(&src, &dst).is_err() {
                std::fs::copy(&src, &dst)?;
                std::fs::remove_file(&src)?;
            }
            info!("Moved {} to {}/Analysis", FITS_GOD_FILE, dir_name(&results));
        } else {
            std::fs::copy(&src, &dst)?;
            info!("Copied {} to {}/Analysis", FITS_GOD_FILE, dir_name(&results));
        }
        count += 1;
    }
    info!("{} files organised", count);
    Ok(count)
}
