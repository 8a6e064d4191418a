// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Extract event lightcurves with `seextrct`.
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{info, warn};

use super::{p, write_lines, RunOptions, StageError};
use crate::fits::{split_gti, split_gti_row};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{analysis_dir, dir_name, results_dirs, GTI_FILE};
use crate::pool::{run_tasks, TaskReport};

/// Which list of data files `seextrct` reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    /// Event-mode data, listed in `fits_files.god`.
    E,
    /// Xenon data already run through `make_se`.
    Xenon,
}

impl Token {
    /// The input list, relative to a results directory.
    pub fn infile(self) -> &'static str {
        match self {
            Token::E => "Analysis/fits_files.god",
            Token::Xenon => "Analysis/xenon_event_files.txt",
        }
    }
}

impl FromStr for Token {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "e" => Ok(Token::E),
            "xenon" => Ok(Token::Xenon),
            _ => Err(StageError::InvalidArgument(format!(
                "Unknown token '{}'; expected 'e' or 'xenon'",
                s
            ))),
        }
    }
}

/// The answers `seextrct` wants to extract one lightcurve.
#[derive(Debug, Clone)]
pub struct SeextrctScript {
    pub results: PathBuf,
    pub infile: String,
    pub gti: PathBuf,
    /// Output root, without extension.
    pub output: PathBuf,
    pub bitmask: PathBuf,
    pub time_bin: f64,
    /// A channel range (e.g. `0-13`). `None` takes every channel.
    pub channels: Option<String>,
}

impl std::fmt::Display for SeextrctScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = vec![
            format!("@{}/{}", self.results.display(), self.infile),
            "-".to_string(),
            p(&self.gti),
            p(&self.output),
            p(&self.bitmask),
            "TIME".to_string(),
            "EVENT".to_string(),
            self.time_bin.to_string(),
            "LIGHTCURVE".to_string(),
            "RATE".to_string(),
            "SUM".to_string(),
        ];
        match &self.channels {
            None => lines.extend(std::iter::repeat("INDEF".to_string()).take(7)),
            Some(c) => {
                lines.extend(std::iter::repeat("INDEF".to_string()).take(5));
                lines.push(c.clone());
                lines.push("INDEF".to_string());
            }
        }
        write_lines(f, &lines)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractParams {
    pub token: Token,
    pub bitmask: String,
    pub prefix: String,
    pub split_gti: bool,
    pub time_bin: f64,
}

/// One `seextrct` run.
#[derive(Debug, Clone)]
pub struct ExtractTask {
    pub results: PathBuf,
    pub gti: PathBuf,
    pub prefix: String,
}

/// Check that a results directory has what `seextrct` needs, warning if not.
pub(crate) fn has_gti_and_bitmask(results: &Path, bitmask: &str) -> bool {
    let analysis = analysis_dir(results);
    if !analysis.join(GTI_FILE).exists() {
        warn!("No {} in {}/Analysis", GTI_FILE, dir_name(results));
        return false;
    }
    if !analysis.join(bitmask).exists() {
        warn!("No {} in {}/Analysis", bitmask, dir_name(results));
        return false;
    }
    true
}

/// Work out the `seextrct` runs for every results directory under `root`.
/// With GTI splitting, each GTI row gets its own run, and output prefix
/// `<prefix>_<row>`.
pub fn find_tasks(root: &Path, params: &ExtractParams) -> Result<Vec<ExtractTask>, StageError> {
    let mut tasks = vec![];
    for results in results_dirs(root)? {
        if !has_gti_and_bitmask(&results, &params.bitmask) {
            continue;
        }
        let gti = analysis_dir(&results).join(GTI_FILE);
        if params.split_gti {
            for g in split_gti(&gti, &results.join("sep_gtis"))? {
                let prefix = match split_gti_row(&g) {
                    Some(row) => format!("{}_{}", params.prefix, row),
                    None => params.prefix.clone(),
                };
                tasks.push(ExtractTask {
                    results: results.clone(),
                    gti: g,
                    prefix,
                });
            }
        } else {
            tasks.push(ExtractTask {
                results: results.clone(),
                gti,
                prefix: params.prefix.clone(),
            });
        }
    }
    Ok(tasks)
}

pub fn script_for(task: &ExtractTask, params: &ExtractParams) -> SeextrctScript {
    let analysis = analysis_dir(&task.results);
    SeextrctScript {
        results: task.results.clone(),
        infile: params.token.infile().to_string(),
        gti: task.gti.clone(),
        output: analysis.join(&task.prefix),
        bitmask: analysis.join(&params.bitmask),
        time_bin: params.time_bin,
        channels: None,
    }
}

fn extract_one(task: &ExtractTask, params: &ExtractParams, opts: &RunOptions) -> Result<(), StageError> {
    let script = script_for(task, params);
    Tool::new("seextrct")
        .arg("clobber=yes")
        .script(task.results.join(format!("script_{}.txt", task.prefix)), &script)
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

pub fn extract_all_events(root: &Path, params: &ExtractParams, opts: &RunOptions) -> Result<TaskReport, StageError> {
    require_tool("seextrct")?;
    let tasks = find_tasks(root, params)?;
    info!("Extracting {} event files with {} workers", tasks.len(), opts.workers);
    let report = run_tasks(
        opts.workers,
        &tasks,
        |t| format!("{}/{}", dir_name(&t.results), t.prefix),
        |t| extract_one(t, params, opts),
    )?;
    info!("seextrct: {}", report);
    Ok(report)
}
