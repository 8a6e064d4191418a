// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lightcurve plots rendered by `lcurve`.

use std::path::{Path, PathBuf};

use log::{info, warn};

use super::{file_stem, require_file, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{analysis_dir, dir_name, file_glob, matching_files, results_dirs};
use crate::pool::{run_tasks, TaskReport};

/// Max bins when several lightcurves share a plot.
const MULTI_MAX_BINS: u64 = 2_000_000;

#[derive(Debug, Clone)]
pub struct PlotParams {
    pub bin_size: String,
    pub max_bins: u64,
    pub format: String,
}

/// `lcurve` answers to plot one or more lightcurves into `<output>.<format>`.
/// The files are given by name, as `lcurve` runs in their directory.
#[derive(Debug)]
pub struct LcurveScript<'a> {
    pub files: Vec<String>,
    pub output: String,
    pub params: &'a PlotParams,
    /// Several lightcurves sharing one plot window.
    pub overlay: bool,
}

impl<'a> std::fmt::Display for LcurveScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = vec![self.files.len().to_string()];
        lines.extend(self.files.iter().cloned());
        lines.extend(vec![
            "-".to_string(),
            self.params.bin_size.clone(),
            self.params.max_bins.to_string(),
            "out".to_string(),
            "yes".to_string(),
            "/xw".to_string(),
        ]);
        if self.overlay {
            lines.push("1".to_string());
        } else {
            lines.push("line on".to_string());
            lines.push("pl".to_string());
        }
        lines.push(format!("hardcopy {0}.{1}/{1}", self.output, self.params.format));
        lines.push("q".to_string());
        write_lines(f, &lines)
    }
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Plot one lightcurve into `<stem>.<format>` next to it.
pub fn plot_single_lightcurve(lc: &Path, params: &PlotParams, opts: &RunOptions) -> Result<PathBuf, StageError> {
    require_file(lc)?;
    let dir = lc.parent().unwrap_or_else(|| Path::new("."));
    let name = file_name(lc);
    let stem = file_stem(&name);
    Tool::new("lcurve")
        .script(
            dir.join(format!("lcurve_{}.txt", stem)),
            &LcurveScript {
                files: vec![name],
                output: stem.clone(),
                params,
                overlay: false,
            },
        )
        .current_dir(dir)
        .log_to(dir.join(format!("{}_lcurve.log", stem)))
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(dir.join(format!("{}.{}", stem, params.format)))
}

/// Lightcurves matching `pattern` in every Analysis directory.
pub fn find_lightcurves(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, StageError> {
    let glob = file_glob(pattern)?;
    let mut files = vec![];
    for results in results_dirs(root)? {
        let analysis = analysis_dir(&results);
        if analysis.is_dir() {
            files.extend(matching_files(&analysis, &glob)?);
        }
    }
    Ok(files)
}

pub fn plot_all_lightcurves(
    root: &Path,
    pattern: &str,
    params: &PlotParams,
    opts: &RunOptions,
) -> Result<TaskReport, StageError> {
    require_tool("lcurve")?;
    let files = find_lightcurves(root, pattern)?;
    if files.is_empty() {
        warn!("No lightcurve files matching '{}' found", pattern);
        return Ok(TaskReport::default());
    }
    info!("Plotting {} lightcurves with {} workers", files.len(), opts.workers);
    let report = run_tasks(
        opts.workers,
        &files,
        |lc| {
            let results = lc.parent().and_then(|a| a.parent()).map(dir_name).unwrap_or_default();
            format!("{}/{}", results, file_name(lc))
        },
        |lc| plot_single_lightcurve(lc, params, opts).map(|_| ()),
    )?;
    info!("lcurve: {}", report);
    Ok(report)
}

/// Plot several lightcurves, which must share a directory, together into
/// `<output>.<format>` in that directory.
pub fn plot_multiple_lightcurves(
    files: &[PathBuf],
    output: &str,
    bin_size: &str,
    format: &str,
    opts: &RunOptions,
) -> Result<PathBuf, StageError> {
    let first = files
        .first()
        .ok_or_else(|| StageError::InvalidArgument("No lightcurve files provided".to_string()))?;
    let dir = first.parent().unwrap_or_else(|| Path::new("."));
    for f in files {
        require_file(f)?;
        if f.parent().unwrap_or_else(|| Path::new(".")) != dir {
            return Err(StageError::InvalidArgument(format!(
                "{} is not in {}; lightcurves plotted together must share a directory",
                f.display(),
                dir.display()
            )));
        }
    }
    require_tool("lcurve")?;

    let params = PlotParams {
        bin_size: bin_size.to_string(),
        max_bins: MULTI_MAX_BINS,
        format: format.to_string(),
    };
    let script = LcurveScript {
        files: files.iter().map(|f| file_name(f)).collect(),
        output: output.to_string(),
        params: &params,
        overlay: true,
    };
    Tool::new("lcurve")
        .script(dir.join(format!("lcurve_multi_{}.txt", output)), &script)
        .current_dir(dir)
        .log_to(dir.join(format!("{}_lcurve.log", output)))
        .keep_script(opts.keep_scripts)
        .run()?;
    let plot = dir.join(format!("{}.{}", output, format));
    info!("Created {}", plot.display());
    Ok(plot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_utils::make_results;

    fn params() -> PlotParams {
        PlotParams {
            bin_size: "1".to_string(),
            max_bins: 10000,
            format: "png".to_string(),
        }
    }

    #[test]
    fn test_single_script() {
        let params = params();
        let script = LcurveScript {
            files: vec!["light.lc".to_string()],
            output: "light".to_string(),
            params: &params,
            overlay: false,
        };
        assert_eq!(
            script.to_string(),
            "1\nlight.lc\n-\n1\n10000\nout\nyes\n/xw\nline on\npl\nhardcopy light.png/png\nq\n"
        );
    }

    #[test]
    fn test_multi_script() {
        let params = PlotParams {
            bin_size: "-1".to_string(),
            max_bins: MULTI_MAX_BINS,
            format: "eps".to_string(),
        };
        let script = LcurveScript {
            files: vec!["soft.lc".to_string(), "hard.lc".to_string()],
            output: "comparison".to_string(),
            params: &params,
            overlay: true,
        };
        assert_eq!(
            script.to_string(),
            "2\nsoft.lc\nhard.lc\n-\n-1\n2000000\nout\nyes\n/xw\n1\nhardcopy comparison.eps/eps\nq\n"
        );
    }

    #[test]
    fn test_find_lightcurves() {
        let root = tempfile::tempdir().unwrap();
        make_results(root.path(), "A1", &["light.lc", "event.lc", "notes.txt"]);
        make_results(root.path(), "B2", &["std1.lc"]);
        let files = find_lightcurves(root.path(), "*.lc").unwrap();
        let names: Vec<String> = files.iter().map(|f| file_name(f)).collect();
        assert_eq!(names, vec!["event.lc", "light.lc", "std1.lc"]);
    }

    #[test]
    fn test_multi_needs_files() {
        let result = plot_multiple_lightcurves(&[], "comparison", "-1", "png", &RunOptions::default());
        assert!(matches!(result, Err(StageError::InvalidArgument(_))));

        let root = tempfile::tempdir().unwrap();
        let a = make_results(root.path(), "A1", &["soft.lc"]);
        let b = make_results(root.path(), "B2", &["hard.lc"]);
        let result = plot_multiple_lightcurves(
            &[a.join("Analysis/soft.lc"), b.join("Analysis/hard.lc")],
            "comparison",
            "-1",
            "png",
            &RunOptions::default(),
        );
        assert!(matches!(result, Err(StageError::InvalidArgument(_))));
    }
}
