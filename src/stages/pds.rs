// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Power density spectra.
 *
 * Per observation this is a chain of three tools:
 * - `powspec` turns the lightcurve into `<stem>.fps`;
 * - `fplot` dumps frequency and power (with errors) to `<stem>_fps.qdp`;
 * - the QDP is rewritten as frequency bins and handed to `flx2xsp`, which
 *   makes `pds-src.pha` and `pds-rsp.pha` for XSPEC.
 */

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::{file_stem, p, require_file, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{analysis_dir, dir_name, results_dirs};
use crate::pool::{run_tasks, TaskReport};

/// Lines at the top of an `fplot` QDP dump that aren't data.
const QDP_HEADER_LINES: usize = 3;

#[derive(Debug, Clone)]
pub struct PdsParams {
    /// Lightcurve file name inside Analysis.
    pub lightcurve: String,
    pub binning: String,
    pub rebin: String,
    pub max_bins: u64,
    pub window: String,
    pub norm: i32,
    /// `powspec` hardcopy device, e.g. `pds.png/png`.
    pub output_png: String,
}

#[derive(Debug)]
pub struct PowspecScript<'a> {
    pub params: &'a PdsParams,
    pub analysis: PathBuf,
}

impl<'a> std::fmt::Display for PowspecScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stem = file_stem(&self.params.lightcurve);
        write_lines(
            f,
            &[
                self.params.lightcurve.clone(),
                "-".to_string(),
                self.params.binning.clone(),
                self.params.max_bins.to_string(),
                "INDEF".to_string(),
                self.params.rebin.clone(),
                "default".to_string(),
                "yes".to_string(),
                "/xw".to_string(),
                format!("hardcopy {}", self.params.output_png),
                format!("Wd {}", p(&self.analysis.join(format!("{}.qdp", stem)))),
                "q".to_string(),
            ],
        )
    }
}

#[derive(Debug)]
pub struct FplotScript {
    pub analysis: PathBuf,
    pub stem: String,
}

impl std::fmt::Display for FplotScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_lines(
            f,
            &[
                p(&self.analysis.join(format!("{}.fps", self.stem))),
                "FREQUENCY[XAX_E]".to_string(),
                "POWER[ERROR]".to_string(),
                "-".to_string(),
                "/xw".to_string(),
                "log xy on".to_string(),
                format!("wd {}", p(&self.analysis.join(format!("{}_fps", self.stem)))),
                "q".to_string(),
            ],
        )
    }
}

#[derive(Debug)]
pub struct Flx2xspScript {
    pub analysis: PathBuf,
}

impl std::fmt::Display for Flx2xspScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_lines(
            f,
            &[
                p(&self.analysis.join("temp.dat")),
                p(&self.analysis.join("pds-src.pha")),
                p(&self.analysis.join("pds-rsp.pha")),
                "$".to_string(),
            ],
        )
    }
}

/// Convert `fplot` QDP rows of `freq freq_err power power_err` into
/// `freq_lo freq_hi power power_err`, as `flx2xsp` wants. The header is
/// skipped, as is any row without four numbers at its start. Returns the
/// number of rows written.
pub fn qdp_to_flx<R: BufRead, W: Write>(qdp: R, mut out: W) -> Result<usize, std::io::Error> {
    let mut written = 0;
    for line in qdp.lines().skip(QDP_HEADER_LINES) {
        let line = line?;
        let values: Vec<f64> = line
            .split_whitespace()
            .take(4)
            .map_while(|v| v.parse().ok())
            .collect();
        if let [freq, freq_err, power, power_err] = values[..] {
            writeln!(
                out,
                "{} {} {} {}",
                freq - freq_err,
                freq + freq_err,
                power,
                power_err
            )?;
            written += 1;
        } else {
            debug!("Skipping QDP line '{}'", line);
        }
    }
    Ok(written)
}

fn pds_one(results: &Path, params: &PdsParams, opts: &RunOptions) -> Result<(), StageError> {
    let analysis = analysis_dir(results);
    require_file(&analysis.join(&params.lightcurve))?;
    let stem = file_stem(&params.lightcurve);

    Tool::new("powspec")
        .arg(format!("norm={}", params.norm))
        .arg(format!("window={}", params.window))
        .script(
            analysis.join("scriptpowspec.txt"),
            &PowspecScript {
                params,
                analysis: analysis.clone(),
            },
        )
        .current_dir(&analysis)
        .log_to(analysis.join("pow.txt"))
        .keep_script(opts.keep_scripts)
        .run()?;

    Tool::new("fplot")
        .script(
            analysis.join("scriplot.txt"),
            &FplotScript {
                analysis: analysis.clone(),
                stem: stem.clone(),
            },
        )
        .current_dir(&analysis)
        .keep_script(opts.keep_scripts)
        .run()?;

    let qdp = analysis.join(format!("{}_fps.qdp", stem));
    require_file(&qdp)?;
    let dat = analysis.join("temp.dat");
    let mut writer = BufWriter::new(std::fs::File::create(&dat)?);
    let rows = qdp_to_flx(BufReader::new(std::fs::File::open(&qdp)?), &mut writer)?;
    writer.flush()?;
    debug!("{}: wrote {} rows to {}", dir_name(results), rows, dat.display());

    Tool::new("flx2xsp")
        .script(results.join("script_flx2xsp.txt"), &Flx2xspScript { analysis: analysis.clone() })
        .log_to(analysis.join("pds.txt"))
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

pub fn compute_pds(root: &Path, params: &PdsParams, opts: &RunOptions) -> Result<TaskReport, StageError> {
    for tool in &["powspec", "fplot", "flx2xsp"] {
        require_tool(tool)?;
    }
    let dirs = results_dirs(root)?;
    info!("Making power spectra for {} observations with {} workers", dirs.len(), opts.workers);
    let report = run_tasks(opts.workers, &dirs, |d| dir_name(d), |d| pds_one(d, params, opts))?;
    info!("PDS: {}", report);
    Ok(report)
}
