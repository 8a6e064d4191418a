// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Where things live in an RXTE data directory.
 *
 * A root directory holds one directory per observation (named after its
 * ObsID, e.g. `10412-01-01-00`), and `pcaprepobsid` writes its products to a
 * sibling `<obsid>-results` directory. Most stages work inside
 * `<obsid>-results/Analysis`.
 */

use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use lazy_static::lazy_static;

pub const RESULTS_SUFFIX: &str = "-results";
pub const ANALYSIS_DIR: &str = "Analysis";

pub const FITS_GOD_FILE: &str = "fits_files.god";
pub const XENON_GOD_FILE: &str = "xenon_files.god";
pub const XENON_EVENT_LIST: &str = "xenon_event_files.txt";
pub const GTI_FILE: &str = "good.gti";

pub const XTEFILT_LIST: &str = "FP_xtefilt.lis";
pub const STD1_LIST: &str = "FP_dtstd1.lis";
pub const STD2_LIST: &str = "FP_dtstd2.lis";
pub const BKG2_LIST: &str = "FP_dtbkg2.lis";

lazy_static! {
    static ref RESULTS_GLOB: GlobMatcher = Glob::new(&format!("*{}", RESULTS_SUFFIX))
        .unwrap()
        .compile_matcher();
}

fn sorted_subdirs<F: Fn(&str) -> bool>(root: &Path, keep: F) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut dirs = vec![];
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if keep(name) {
                dirs.push(path);
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// All `*-results` directories directly inside `root`, sorted.
pub fn results_dirs(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    sorted_subdirs(root, |name| RESULTS_GLOB.is_match(name))
}

/// All observation directories directly inside `root`, sorted. These are
/// directories with at least one digit in their name that aren't results
/// directories.
pub fn observation_dirs(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    sorted_subdirs(root, |name| {
        name.chars().any(|c| c.is_ascii_digit()) && !RESULTS_GLOB.is_match(name)
    })
}

/// `<root>/<obsid>-results` for an observation directory.
pub fn results_dir_for(observation: &Path) -> PathBuf {
    let name = dir_name(observation);
    observation.with_file_name(format!("{}{}", name, RESULTS_SUFFIX))
}

/// The observation directory a results directory was made from.
pub fn observation_dir_for(results: &Path) -> Option<PathBuf> {
    let name = results.file_name()?.to_str()?;
    let obsid = name.strip_suffix(RESULTS_SUFFIX)?;
    Some(results.with_file_name(obsid))
}

pub fn analysis_dir(results: &Path) -> PathBuf {
    results.join(ANALYSIS_DIR)
}

/// Like `analysis_dir`, but create the directory if it doesn't exist.
pub fn ensure_analysis_dir(results: &Path) -> Result<PathBuf, std::io::Error> {
    let a = analysis_dir(results);
    std::fs::create_dir_all(&a)?;
    Ok(a)
}

/// The last component of a path, for log messages.
pub fn dir_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| p.display().to_string())
}

/// Compile a glob that is matched against file names.
pub fn file_glob(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

/// Files directly inside `dir` whose names match `glob`, sorted.
pub fn matching_files(dir: &Path, glob: &GlobMatcher) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.file_name().map(|n| glob.is_match(n)).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for d in &[
            "10412-01-01-00",
            "10412-01-01-00-results",
            "20000-02-03-00",
            "notes",
            "scratch-results",
        ] {
            std::fs::create_dir(root.path().join(d)).unwrap();
        }
        // A file that looks like an observation shouldn't count.
        std::fs::write(root.path().join("30000-01-01-00"), "").unwrap();
        root
    }

    #[test]
    fn test_results_dirs() {
        let root = make_tree();
        let names: Vec<String> = results_dirs(root.path())
            .unwrap()
            .iter()
            .map(|p| dir_name(p))
            .collect();
        assert_eq!(names, vec!["10412-01-01-00-results", "scratch-results"]);
    }

    #[test]
    fn test_observation_dirs_exclude_results() {
        let root = make_tree();
        let names: Vec<String> = observation_dirs(root.path())
            .unwrap()
            .iter()
            .map(|p| dir_name(p))
            .collect();
        assert_eq!(names, vec!["10412-01-01-00", "20000-02-03-00"]);
    }

    #[test]
    fn test_results_and_observation_paths() {
        let obs = PathBuf::from("/data/10412-01-01-00");
        let results = results_dir_for(&obs);
        assert_eq!(results, PathBuf::from("/data/10412-01-01-00-results"));
        assert_eq!(observation_dir_for(&results), Some(obs));
        assert_eq!(observation_dir_for(Path::new("/data/Analysis")), None);
        assert_eq!(
            analysis_dir(&results),
            PathBuf::from("/data/10412-01-01-00-results/Analysis")
        );
    }

    #[test]
    fn test_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        for f in &["xenon_event_gx0", "xenon_event_gx1", "event.lc"] {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        let glob = file_glob("xenon_event_gx*").unwrap();
        let files = matching_files(dir.path(), &glob).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("xenon_event_gx0"));
    }
}
