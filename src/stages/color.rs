// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Colour-colour diagrams: lightcurves in several channel ranges, then
 * plotted against each other by `lcurve`.
 */

use std::path::{Path, PathBuf};

use log::info;

use super::extract::{has_gti_and_bitmask, SeextrctScript, Token};
use super::{require_file, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{analysis_dir, dir_name, results_dirs, GTI_FILE};
use crate::pool::{run_tasks, TaskReport};

/// A named channel range, e.g. `soft` = `0-13`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBand {
    pub name: String,
    pub channels: String,
}

/// Pair up colour names with their channel ranges.
pub fn bands(names: &[String], ranges: &[String]) -> Result<Vec<ColorBand>, StageError> {
    if names.len() != ranges.len() {
        return Err(StageError::InvalidArgument(format!(
            "Number of ranges ({}) must match number of names ({})",
            ranges.len(),
            names.len()
        )));
    }
    Ok(names
        .iter()
        .zip(ranges)
        .map(|(n, r)| ColorBand {
            name: n.clone(),
            channels: r.clone(),
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct ColorExtractParams {
    pub token: Token,
    pub bitmask: String,
    pub bands: Vec<ColorBand>,
    pub time_bin: f64,
}

#[derive(Debug, Clone)]
pub struct ColorTask {
    pub results: PathBuf,
    pub band: ColorBand,
}

pub fn find_extract_tasks(root: &Path, params: &ColorExtractParams) -> Result<Vec<ColorTask>, StageError> {
    let mut tasks = vec![];
    for results in results_dirs(root)? {
        if !has_gti_and_bitmask(&results, &params.bitmask) {
            continue;
        }
        for band in &params.bands {
            tasks.push(ColorTask {
                results: results.clone(),
                band: band.clone(),
            });
        }
    }
    Ok(tasks)
}

pub fn extract_script(task: &ColorTask, params: &ColorExtractParams) -> SeextrctScript {
    let analysis = analysis_dir(&task.results);
    SeextrctScript {
        results: task.results.clone(),
        infile: params.token.infile().to_string(),
        gti: analysis.join(GTI_FILE),
        output: analysis.join(&task.band.name),
        bitmask: analysis.join(&params.bitmask),
        time_bin: params.time_bin,
        channels: Some(task.band.channels.clone()),
    }
}

fn extract_one(task: &ColorTask, params: &ColorExtractParams, opts: &RunOptions) -> Result<(), StageError> {
    Tool::new("seextrct")
        .arg("clobber=yes")
        .script(
            task.results.join(format!("script_color_{}.txt", task.band.name)),
            &extract_script(task, params),
        )
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

/// Extract one lightcurve per colour band in every results directory.
pub fn extract_color_ranges(
    root: &Path,
    params: &ColorExtractParams,
    opts: &RunOptions,
) -> Result<TaskReport, StageError> {
    require_tool("seextrct")?;
    let tasks = find_extract_tasks(root, params)?;
    info!("Extracting {} colour lightcurves with {} workers", tasks.len(), opts.workers);
    let report = run_tasks(
        opts.workers,
        &tasks,
        |t| format!("{}/{}", dir_name(&t.results), t.band.name),
        |t| extract_one(t, params, opts),
    )?;
    info!("seextrct: {}", report);
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct ColorPlotParams {
    pub names: Vec<String>,
    pub bin_size: String,
    pub max_bins: u64,
    pub format: String,
}

/// `lcurve` answers for a colour-colour plot of `<name>.lc` files.
#[derive(Debug)]
pub struct CcdScript<'a> {
    pub params: &'a ColorPlotParams,
}

impl<'a> std::fmt::Display for CcdScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = vec![self.params.names.len().to_string()];
        lines.extend(self.params.names.iter().map(|n| format!("{}.lc", n)));
        lines.extend(vec![
            "-".to_string(),
            self.params.bin_size.clone(),
            self.params.max_bins.to_string(),
            "out".to_string(),
            "yes".to_string(),
            "/xw".to_string(),
            "1".to_string(),
            format!("hardcopy ccd_plot.{0}/{0}", self.params.format),
            "q".to_string(),
        ]);
        write_lines(f, &lines)
    }
}

fn plot_one(results: &Path, params: &ColorPlotParams, opts: &RunOptions) -> Result<(), StageError> {
    let analysis = analysis_dir(results);
    for n in &params.names {
        require_file(&analysis.join(format!("{}.lc", n)))?;
    }
    Tool::new("lcurve")
        .script(analysis.join("lcurve_ccd.txt"), &CcdScript { params })
        .current_dir(&analysis)
        .log_to(analysis.join("ccd_lcurve.txt"))
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

pub fn plot_color_diagrams(root: &Path, params: &ColorPlotParams, opts: &RunOptions) -> Result<TaskReport, StageError> {
    require_tool("lcurve")?;
    if params.names.is_empty() {
        return Err(StageError::InvalidArgument("No colours to plot".to_string()));
    }
    let dirs = results_dirs(root)?;
    info!("Plotting {} colour-colour diagrams with {} workers", dirs.len(), opts.workers);
    let report = run_tasks(opts.workers, &dirs, |d| dir_name(d), |d| plot_one(d, params, opts))?;
    info!("lcurve: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_utils::make_results;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bands_must_pair_up() {
        let b = bands(&names(&["soft", "hard"]), &names(&["0-13", "36-255"])).unwrap();
        assert_eq!(b[1].name, "hard");
        assert_eq!(b[1].channels, "36-255");
        assert!(matches!(
            bands(&names(&["soft"]), &names(&["0-13", "14-35"])),
            Err(StageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_extract_tasks_and_script() {
        let root = tempfile::tempdir().unwrap();
        let results = make_results(root.path(), "A1", &["good.gti", "bitmask_event"]);
        make_results(root.path(), "B2", &["good.gti"]);
        let params = ColorExtractParams {
            token: Token::E,
            bitmask: "bitmask_event".to_string(),
            bands: bands(&names(&["soft", "medium", "hard"]), &names(&["0-13", "14-35", "36-255"])).unwrap(),
            time_bin: 0.04,
        };

        let tasks = find_extract_tasks(root.path(), &params).unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.results == results));

        let out = extract_script(&tasks[1], &params).to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 18);
        assert_eq!(lines[3], format!("{}", results.join("Analysis/medium").display()));
        assert_eq!(lines[7], "0.04");
        assert_eq!(&lines[11..], &["INDEF", "INDEF", "INDEF", "INDEF", "INDEF", "14-35", "INDEF"]);
    }

    #[test]
    fn test_ccd_script() {
        let params = ColorPlotParams {
            names: names(&["soft", "medium", "hard"]),
            bin_size: "-1".to_string(),
            max_bins: 2_000_000,
            format: "png".to_string(),
        };
        assert_eq!(
            CcdScript { params: &params }.to_string(),
            "3\nsoft.lc\nmedium.lc\nhard.lc\n-\n-1\n2000000\nout\nyes\n/xw\n1\n\
             hardcopy ccd_plot.png/png\nq\n"
        );
    }

    #[test]
    fn test_plot_requires_every_colour() {
        let root = tempfile::tempdir().unwrap();
        let results = make_results(root.path(), "A1", &["soft.lc"]);
        let params = ColorPlotParams {
            names: names(&["soft", "hard"]),
            bin_size: "-1".to_string(),
            max_bins: 2_000_000,
            format: "png".to_string(),
        };
        match plot_one(&results, &params, &RunOptions::default()) {
            Err(StageError::MissingInput(p)) => assert!(p.ends_with("hard.lc")),
            r => panic!("unexpected result: {:?}", r),
        }
    }
}
