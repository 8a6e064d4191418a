// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Distribute a bitmask file to every Analysis directory.

use std::path::Path;

use log::{debug, info};

use super::StageError;
use crate::layout::{analysis_dir, dir_name};

/// Copy `bitmask` into each `*results/Analysis` under `root` that exists.
/// Returns how many copies were made.
pub fn copy_bitmask(root: &Path, bitmask: &Path, overwrite: bool) -> Result<usize, StageError> {
    if !bitmask.is_file() {
        return Err(StageError::MissingInput(bitmask.to_path_buf()));
    }
    let name = bitmask
        .file_name()
        .ok_or_else(|| StageError::InvalidArgument(format!("{} is not a file", bitmask.display())))?;

    let mut dirs = vec![];
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let is_results = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with("results"))
            .unwrap_or(false);
        if is_results && analysis_dir(&path).is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut count = 0;
    for results in dirs {
        let dest = analysis_dir(&results).join(name);
        if dest.exists() && !overwrite {
            debug!("{} already has {}", dir_name(&results), dest.display());
            continue;
        }
        std::fs::copy(bitmask, &dest)?;
        info!("{}: done", dir_name(&results));
        count += 1;
    }
    info!("Bitmask copied to {} directories", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_utils::make_results;

    #[test]
    fn test_copy_bitmask() {
        let root = tempfile::tempdir().unwrap();
        let bitmask = root.path().join("bitmask_event");
        std::fs::write(&bitmask, "mask").unwrap();
        let a = make_results(root.path(), "A1", &[]);
        let b = make_results(root.path(), "B2", &["bitmask_event"]);
        // No Analysis directory here.
        std::fs::create_dir(root.path().join("C3-results")).unwrap();

        assert_eq!(copy_bitmask(root.path(), &bitmask, false).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(a.join("Analysis/bitmask_event")).unwrap(),
            "mask"
        );
        assert_eq!(
            std::fs::read_to_string(b.join("Analysis/bitmask_event")).unwrap(),
            ""
        );
        assert!(!root.path().join("C3-results/Analysis").exists());

        assert_eq!(copy_bitmask(root.path(), &bitmask, true).unwrap(), 2);
        assert_eq!(
            std::fs::read_to_string(b.join("Analysis/bitmask_event")).unwrap(),
            "mask"
        );
    }

    #[test]
    fn test_missing_bitmask() {
        let root = tempfile::tempdir().unwrap();
        let result = copy_bitmask(root.path(), &root.path().join("nope"), false);
        assert!(matches!(result, Err(StageError::MissingInput(_))));
    }
}
