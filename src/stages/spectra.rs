// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Source and background spectra with `pcaextspect2`.

use std::path::{Path, PathBuf};

use log::info;

use super::{p, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{
    dir_name, ensure_analysis_dir, results_dirs, BKG2_LIST, GTI_FILE, STD2_LIST, XTEFILT_LIST,
};
use crate::pool::{run_tasks, TaskReport};

#[derive(Debug, Clone)]
pub struct SpectraParams {
    pub pcu: String,
    pub channels: String,
    pub source_file: String,
    pub background_file: String,
    pub response_file: String,
}

#[derive(Debug)]
pub struct SpectrumScript<'a> {
    pub params: &'a SpectraParams,
    pub results: PathBuf,
    pub analysis: PathBuf,
}

impl<'a> std::fmt::Display for SpectrumScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = self.results.display();
        let a = &self.analysis;
        write_lines(
            f,
            &[
                format!("@{}/{}", r, STD2_LIST),
                format!("@{}/{}", r, BKG2_LIST),
                p(&a.join(&self.params.source_file)),
                p(&a.join(&self.params.background_file)),
                p(&a.join(GTI_FILE)),
                self.params.pcu.clone(),
                self.params.channels.clone(),
                p(&a.join(&self.params.response_file)),
                format!("@{}/{}", r, XTEFILT_LIST),
            ],
        )
    }
}

fn spectrum_one(results: &Path, params: &SpectraParams, opts: &RunOptions) -> Result<(), StageError> {
    let analysis = ensure_analysis_dir(results)?;
    let script = SpectrumScript {
        params,
        results: results.to_path_buf(),
        analysis,
    };
    Tool::new("pcaextspect2")
        .script(results.join("script_spec.txt"), &script)
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

pub fn extract_spectra(root: &Path, params: &SpectraParams, opts: &RunOptions) -> Result<TaskReport, StageError> {
    require_tool("pcaextspect2")?;
    let dirs = results_dirs(root)?;
    info!("Extracting spectra for {} observations", dirs.len());
    let report = run_tasks(opts.workers, &dirs, |d| dir_name(d), |d| spectrum_one(d, params, opts))?;
    info!("pcaextspect2: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_script() {
        let params = SpectraParams {
            pcu: "2".to_string(),
            channels: "ALL".to_string(),
            source_file: "src.pha".to_string(),
            background_file: "bkg.pha".to_string(),
            response_file: "rsp.pha".to_string(),
        };
        let script = SpectrumScript {
            params: &params,
            results: PathBuf::from("/d/A-results"),
            analysis: PathBuf::from("/d/A-results/Analysis"),
        };
        assert_eq!(
            script.to_string(),
            "@/d/A-results/FP_dtstd2.lis\n\
             @/d/A-results/FP_dtbkg2.lis\n\
             /d/A-results/Analysis/src.pha\n\
             /d/A-results/Analysis/bkg.pha\n\
             /d/A-results/Analysis/good.gti\n\
             2\n\
             ALL\n\
             /d/A-results/Analysis/rsp.pha\n\
             @/d/A-results/FP_xtefilt.lis\n"
        );
    }
}
