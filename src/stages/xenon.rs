// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Good Xenon mode preprocessing.
 *
 * Good Xenon data have to be turned into event files by `make_se` before
 * `seextrct` can use them. The steps are:
 * 1. list each observation's Xenon files in `<obsid>/xenon_files.god`;
 * 2. move that list into `<obsid>-results/Analysis`;
 * 3. run `make_se` on it;
 * 4. list the event files `make_se` made in `xenon_event_files.txt`.
 */

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::{write_lines, RunOptions, StageError};
use crate::fits::read_xenon_header;
use crate::heasoft::{require_tool, Tool};
use crate::layout::{
    analysis_dir, dir_name, ensure_analysis_dir, file_glob, matching_files, observation_dir_for,
    observation_dirs, results_dirs, XENON_EVENT_LIST, XENON_GOD_FILE,
};
use crate::pool::{run_tasks, TaskReport};

/// Could this be a raw PCA data file? These start with `F` and are either
/// extension-less or gzipped.
fn is_candidate(name: &str) -> bool {
    name.starts_with('F') && (!name.contains('.') || name.ends_with(".gz"))
}

/// Recursively collect candidate data files under `dir`.
fn candidate_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            candidate_files(&path, out)?;
        } else if path.file_name().and_then(|n| n.to_str()).map(is_candidate).unwrap_or(false) {
            out.push(path);
        }
    }
    Ok(())
}

/// The name `make_se` should be given for a data file: cfitsio finds the
/// `.gz` on its own, so it's left off.
fn listed_name(p: &Path) -> String {
    let s = p.display().to_string();
    match s.strip_suffix(".gz") {
        Some(stripped) => stripped.to_string(),
        None => s,
    }
}

/// Find the Xenon data files of one observation.
pub fn find_xenon_files(observation: &Path, extension: &str) -> Result<Vec<String>, std::io::Error> {
    let mut candidates = vec![];
    candidate_files(&observation.join("pca"), &mut candidates)?;
    candidates.sort();
    Ok(candidates
        .into_iter()
        .filter(|f| match read_xenon_header(f, extension) {
            Some((data_mode, ddesc)) => {
                debug!("{}: DATAMODE={} DDESC={}", f.display(), data_mode, ddesc);
                true
            }
            None => false,
        })
        .map(|f| listed_name(&f))
        .collect())
}

/// Write `xenon_files.god` into every observation directory with Xenon data.
/// Returns how many were written.
pub fn create_xenon_god_files(root: &Path, extension: &str) -> Result<usize, StageError> {
    let mut count = 0;
    for observation in observation_dirs(root)? {
        if !observation.join("pca").is_dir() {
            warn!("No pca/ in {}", dir_name(&observation));
            continue;
        }
        let files = find_xenon_files(&observation, extension)?;
        if files.is_empty() {
            warn!("No Xenon FITS files in {}/pca", dir_name(&observation));
            continue;
        }
        let god = observation.join(XENON_GOD_FILE);
        let mut f = std::fs::File::create(&god)?;
        for l in &files {
            writeln!(f, "{}", l)?;
        }
        info!("Created {} ({} files)", god.display(), files.len());
        count += 1;
    }
    info!("{} {} files created", count, XENON_GOD_FILE);
    Ok(count)
}

/// Move each observation's `xenon_files.god` into its Analysis directory.
pub fn move_xenon_god_files(root: &Path) -> Result<usize, StageError> {
    let mut count = 0;
    for results in results_dirs(root)? {
        let analysis = ensure_analysis_dir(&results)?;
        let observation = match observation_dir_for(&results) {
            Some(o) if o.is_dir() => o,
            _ => continue,
        };
        let src = observation.join(XENON_GOD_FILE);
        if !src.exists() {
            warn!("No {} in {}", XENON_GOD_FILE, observation.display());
            continue;
        }
        let dst = analysis.join(XENON_GOD_FILE);
        if std::fs::rename(&src, &dst).is_err() {
            std::fs::copy(&src, &dst)?;
            std::fs::remove_file(&src)?;
        }
        info!("Moved {} to {}/Analysis", XENON_GOD_FILE, dir_name(&results));
        count += 1;
    }
    info!("{} files moved", count);
    Ok(count)
}

#[derive(Debug)]
pub struct MakeSeScript {
    pub output_root: String,
}

impl std::fmt::Display for MakeSeScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_lines(f, &[XENON_GOD_FILE, self.output_root.as_str()])
    }
}

/// The Analysis directories ready for `make_se`.
pub fn make_se_dirs(root: &Path) -> Result<Vec<PathBuf>, StageError> {
    let mut dirs = vec![];
    for results in results_dirs(root)? {
        let analysis = analysis_dir(&results);
        if analysis.join(XENON_GOD_FILE).exists() {
            dirs.push(analysis);
        } else {
            warn!("No {} in {}/Analysis", XENON_GOD_FILE, dir_name(&results));
        }
    }
    Ok(dirs)
}

fn make_se_one(analysis: &Path, output_root: &str, opts: &RunOptions) -> Result<(), StageError> {
    Tool::new("make_se")
        .script(
            analysis.join("make_se_script.txt"),
            &MakeSeScript {
                output_root: output_root.to_string(),
            },
        )
        .current_dir(analysis)
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

pub fn run_make_se(root: &Path, output_root: &str, opts: &RunOptions) -> Result<TaskReport, StageError> {
    require_tool("make_se")?;
    let dirs = make_se_dirs(root)?;
    info!("Running make_se for {} observations with {} workers", dirs.len(), opts.workers);
    let report = run_tasks(
        opts.workers,
        &dirs,
        |a| a.parent().map(dir_name).unwrap_or_else(|| dir_name(a)),
        |a| make_se_one(a, output_root, opts),
    )?;
    info!("make_se: {}", report);
    Ok(report)
}

/// List the `make_se` outputs matching `pattern` in each Analysis directory
/// in `xenon_event_files.txt`.
pub fn create_xenon_event_lists(root: &Path, pattern: &str) -> Result<usize, StageError> {
    let glob = file_glob(pattern)?;
    let mut count = 0;
    for results in results_dirs(root)? {
        let analysis = analysis_dir(&results);
        if !analysis.is_dir() {
            continue;
        }
        let files = matching_files(&analysis, &glob)?;
        if files.is_empty() {
            warn!("No {} files in {}/Analysis", pattern, dir_name(&results));
            continue;
        }
        let mut f = std::fs::File::create(analysis.join(XENON_EVENT_LIST))?;
        for e in &files {
            writeln!(f, "{}", e.display())?;
        }
        info!("{}: {} files", dir_name(&results), files.len());
        count += 1;
    }
    info!("{} lists created", count);
    Ok(count)
}

#[derive(Debug, Clone)]
pub struct XenonParams {
    pub extension: String,
    pub output_root: String,
    pub event_pattern: String,
    pub run_make_se: bool,
}

/// All the Xenon steps in order. Without `run_make_se`, only the god files
/// are made and moved.
pub fn xenon_complete_workflow(root: &Path, params: &XenonParams, opts: &RunOptions) -> Result<TaskReport, StageError> {
    info!("Step 1: Creating {}", XENON_GOD_FILE);
    create_xenon_god_files(root, &params.extension)?;
    info!("Step 2: Moving {} to Analysis", XENON_GOD_FILE);
    move_xenon_god_files(root)?;

    if !params.run_make_se {
        info!("Skipping make_se; run it yourself if needed");
        return Ok(TaskReport::default());
    }
    info!("Step 3: Running make_se");
    let report = run_make_se(root, &params.output_root, opts)?;
    info!("Step 4: Creating {}", XENON_EVENT_LIST);
    create_xenon_event_lists(root, &params.event_pattern)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_utils::make_results;
    use fitsio::tables::{ColumnDataType, ColumnDescription};
    use fitsio::FitsFile;

    fn make_data_file(path: &Path, extension: &str, data_mode: Option<&str>) {
        let mut f = FitsFile::create(path).open().unwrap();
        let cols = [ColumnDescription::new("TIME")
            .with_type(ColumnDataType::Double)
            .create()
            .unwrap()];
        let hdu = f.create_table(extension.to_string(), &cols).unwrap();
        if let Some(dm) = data_mode {
            hdu.write_key(&mut f, "DATAMODE", dm).unwrap();
        }
    }

    #[test]
    fn test_candidates() {
        assert!(is_candidate("FS4f_1a2b3c4-1a2b3c5"));
        assert!(is_candidate("FS4f_1a2b3c4-1a2b3c5.gz"));
        assert!(!is_candidate("FS4f_1a2b3c4.fits"));
        assert!(!is_candidate("SS4f_1a2b3c4"));
        assert_eq!(listed_name(Path::new("/d/pca/FS4f_1.gz")), "/d/pca/FS4f_1");
        // Only a real `.gz` suffix is removed.
        assert_eq!(listed_name(Path::new("/d/pca/FS4f_zg")), "/d/pca/FS4f_zg");
    }

    #[test]
    fn test_create_and_move_god_files() {
        let root = tempfile::tempdir().unwrap();
        let obs = root.path().join("90001-01-01-00");
        let pca = obs.join("pca").join("sub");
        std::fs::create_dir_all(&pca).unwrap();
        make_data_file(&pca.join("FS4f_2"), "XTE_SP", Some("GoodXenon1_16s"));
        make_data_file(&pca.join("FS4f_1"), "XTE_SP", Some("GoodXenon2_16s"));
        make_data_file(&pca.join("FS37_1"), "XTE_SE", Some("E_125us_64M_0_1s"));
        make_data_file(&pca.join("FS4f_3"), "XTE_SP", None);
        std::fs::write(pca.join("Fnotfits"), "junk").unwrap();
        // An observation without pca/ is skipped.
        std::fs::create_dir(root.path().join("90001-01-02-00")).unwrap();

        assert_eq!(create_xenon_god_files(root.path(), "XTE_SP").unwrap(), 1);
        let god = std::fs::read_to_string(obs.join(XENON_GOD_FILE)).unwrap();
        let listed: Vec<&str> = god.lines().collect();
        assert_eq!(
            listed,
            vec![
                pca.join("FS4f_1").display().to_string(),
                pca.join("FS4f_2").display().to_string()
            ]
        );

        let results = make_results(root.path(), "90001-01-01-00", &[]);
        assert_eq!(move_xenon_god_files(root.path()).unwrap(), 1);
        assert!(!obs.join(XENON_GOD_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(results.join("Analysis").join(XENON_GOD_FILE)).unwrap(),
            god
        );
        assert_eq!(make_se_dirs(root.path()).unwrap(), vec![results.join("Analysis")]);
    }

    #[test]
    fn test_make_se_script() {
        let s = MakeSeScript {
            output_root: "event".to_string(),
        };
        assert_eq!(s.to_string(), "xenon_files.god\nevent\n");
    }

    #[test]
    fn test_event_lists() {
        let root = tempfile::tempdir().unwrap();
        let a = make_results(root.path(), "A1", &["xenon_event_gx1", "xenon_event_gx0", "event.lc"]);
        make_results(root.path(), "B2", &[]);

        assert_eq!(create_xenon_event_lists(root.path(), "xenon_event_gx*").unwrap(), 1);
        let list = std::fs::read_to_string(a.join("Analysis").join(XENON_EVENT_LIST)).unwrap();
        let expected = format!(
            "{}\n{}\n",
            a.join("Analysis/xenon_event_gx0").display(),
            a.join("Analysis/xenon_event_gx1").display()
        );
        assert_eq!(list, expected);
    }
}
