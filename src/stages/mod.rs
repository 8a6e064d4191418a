// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * The processing stages of an RXTE reduction.
 *
 * Each stage scans a root data directory for work, renders one script per
 * task and runs the relevant HEASoft tool over it. Per-task failures are
 * logged and counted in the returned [`TaskReport`]; only problems that stop
 * a stage from starting at all are returned as errors.
 */

pub mod bitmask;
pub mod color;
pub mod error;
pub mod extract;
pub mod filter;
pub mod lightcurve;
pub mod organize;
pub mod pds;
pub mod pipeline;
pub mod plot;
pub mod prepare;
pub mod spectra;
pub mod xenon;
pub mod xspec;

pub use error::StageError;

use std::path::Path;

pub use crate::pool::TaskReport;

/// Settings shared by every stage.
#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    /// How many tool invocations may run at once.
    pub workers: usize,

    /// Leave rendered scripts on disk after the tool has run.
    pub keep_scripts: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            keep_scripts: false,
        }
    }
}

/// Write one answer per line, each followed by a newline.
pub(crate) fn write_lines<S: AsRef<str>>(
    f: &mut std::fmt::Formatter<'_>,
    lines: &[S],
) -> std::fmt::Result {
    for l in lines {
        writeln!(f, "{}", l.as_ref())?;
    }
    Ok(())
}

/// A path as it should appear in a script.
pub(crate) fn p(path: &Path) -> String {
    path.display().to_string()
}

/// Fail with `MissingInput` unless `path` exists.
pub(crate) fn require_file(path: &Path) -> Result<(), StageError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StageError::MissingInput(path.to_path_buf()))
    }
}

/// The stem of a file name, i.e. `event` for `event.lc`.
pub(crate) fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::{Path, PathBuf};

    /// Make `<root>/<obsid>-results/Analysis` along with the given files
    /// inside Analysis.
    pub fn make_results(root: &Path, obsid: &str, analysis_files: &[&str]) -> PathBuf {
        let results = root.join(format!("{}-results", obsid));
        let analysis = results.join("Analysis");
        std::fs::create_dir_all(&analysis).unwrap();
        for f in analysis_files {
            std::fs::write(analysis.join(f), "").unwrap();
        }
        results
    }

    #[cfg(unix)]
    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let p = dir.join(name);
        std::fs::write(&p, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&p).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&p, perms).unwrap();
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answers(Vec<&'static str>);

    impl std::fmt::Display for Answers {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write_lines(f, &self.0)
        }
    }

    #[test]
    fn test_write_lines() {
        assert_eq!(Answers(vec!["a", "-", "INDEF"]).to_string(), "a\n-\nINDEF\n");
        assert_eq!(Answers(vec![]).to_string(), "");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("event.lc"), "event");
        assert_eq!(file_stem("light"), "light");
        assert_eq!(file_stem("a.b.lc"), "a.b");
    }
}
