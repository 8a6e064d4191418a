// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Standard-mode lightcurves with `pcaextlc1` and `pcaextlc2`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

use super::{p, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{dir_name, ensure_analysis_dir, results_dirs, BKG2_LIST, GTI_FILE, STD1_LIST, STD2_LIST};
use crate::pool::{run_tasks, TaskReport};

#[derive(Debug, Clone, PartialEq)]
pub enum LightcurveKind {
    /// Standard1 data; 0.125 s resolution, no energy information.
    Std1 {
        pcu: String,
        bin_size: f64,
    },
    /// Standard2 data; 16 s resolution, 129 channels.
    Std2 {
        pcu: String,
        channels: String,
        time_bins: u32,
    },
}

impl LightcurveKind {
    fn tool(&self) -> &'static str {
        match self {
            LightcurveKind::Std1 { .. } => "pcaextlc1",
            LightcurveKind::Std2 { .. } => "pcaextlc2",
        }
    }

    fn script_name(&self) -> &'static str {
        match self {
            LightcurveKind::Std1 { .. } => "script_std1lc.txt",
            LightcurveKind::Std2 { .. } => "script_std2lc.txt",
        }
    }
}

/// Either "std1" or "std2".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightcurveType {
    Std1,
    Std2,
}

impl FromStr for LightcurveType {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "std1" => Ok(LightcurveType::Std1),
            "std2" => Ok(LightcurveType::Std2),
            _ => Err(StageError::InvalidArgument(format!(
                "Unknown lightcurve type '{}'; expected 'std1' or 'std2'",
                s
            ))),
        }
    }
}

#[derive(Debug)]
pub struct LightcurveScript<'a> {
    pub kind: &'a LightcurveKind,
    pub results: PathBuf,
    pub output: PathBuf,
    pub gti: PathBuf,
}

impl<'a> std::fmt::Display for LightcurveScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data_list = match self.kind {
            LightcurveKind::Std1 { .. } => STD1_LIST,
            LightcurveKind::Std2 { .. } => STD2_LIST,
        };
        let mut lines = vec![
            format!("@{}/{}", self.results.display(), data_list),
            format!("@{}/{}", self.results.display(), BKG2_LIST),
            p(&self.output),
            p(&self.gti),
        ];
        match self.kind {
            LightcurveKind::Std1 { pcu, bin_size } => {
                lines.push(pcu.clone());
                lines.push(bin_size.to_string());
            }
            LightcurveKind::Std2 {
                pcu,
                channels,
                time_bins,
            } => {
                lines.push(pcu.clone());
                lines.push(channels.clone());
                lines.push(time_bins.to_string());
            }
        }
        write_lines(f, &lines)
    }
}

fn lightcurve_one(
    results: &Path,
    kind: &LightcurveKind,
    output_name: &str,
    opts: &RunOptions,
) -> Result<(), StageError> {
    let analysis = ensure_analysis_dir(results)?;
    let script = LightcurveScript {
        kind,
        results: results.to_path_buf(),
        output: analysis.join(output_name),
        gti: analysis.join(GTI_FILE),
    };
    Tool::new(kind.tool())
        .script(results.join(kind.script_name()), &script)
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

/// Make a lightcurve called `output_name` in every results directory's
/// Analysis directory.
pub fn generate_lightcurves(
    root: &Path,
    kind: &LightcurveKind,
    output_name: &str,
    opts: &RunOptions,
) -> Result<TaskReport, StageError> {
    require_tool(kind.tool())?;
    let dirs = results_dirs(root)?;
    info!("Making {} lightcurves with {}", dirs.len(), kind.tool());
    let report = run_tasks(
        opts.workers,
        &dirs,
        |d| dir_name(d),
        |d| lightcurve_one(d, kind, output_name, opts),
    )?;
    info!("{}: {}", kind.tool(), report);
    Ok(report)
}
