// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Create good time intervals with `maketime`.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use super::{p, write_lines, RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{dir_name, ensure_analysis_dir, results_dirs, GTI_FILE, XTEFILT_LIST};
use crate::pool::TaskReport;

/// The answers `maketime` wants.
#[derive(Debug)]
pub struct MaketimeScript {
    /// The filter file, as listed first in `FP_xtefilt.lis`.
    pub filter_file: String,
    pub gti: PathBuf,
    pub expression: String,
}

impl std::fmt::Display for MaketimeScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_lines(
            f,
            &[
                self.filter_file.clone(),
                p(&self.gti),
                self.expression.clone(),
                "no".to_string(),
                "TIME".to_string(),
            ],
        )
    }
}

/// The first line of a file, without its line ending.
fn first_line(file: &Path) -> Result<String, std::io::Error> {
    let mut line = String::new();
    BufReader::new(std::fs::File::open(file)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

fn filter_one(results: &Path, expression: &str, opts: &RunOptions) -> Result<(), StageError> {
    let analysis = ensure_analysis_dir(results)?;
    let script = MaketimeScript {
        filter_file: first_line(&results.join(XTEFILT_LIST))?,
        gti: analysis.join(GTI_FILE),
        expression: expression.to_string(),
    };
    Tool::new("maketime")
        .script(results.join("maketime_script.txt"), &script)
        .keep_script(opts.keep_scripts)
        .run()?;
    Ok(())
}

/// Run `maketime` in every results directory that has an `FP_xtefilt.lis`,
/// writing `Analysis/good.gti`.
pub fn create_gti_filters(root: &Path, expression: &str, opts: &RunOptions) -> Result<TaskReport, StageError> {
    require_tool("maketime")?;
    let mut report = TaskReport::default();
    for results in results_dirs(root)? {
        if !results.join(XTEFILT_LIST).exists() {
            warn!("No {} in {}", XTEFILT_LIST, dir_name(&results));
            continue;
        }
        match filter_one(&results, expression, opts) {
            Ok(()) => {
                info!("{}: done", dir_name(&results));
                report.succeeded += 1;
            }
            Err(e) => {
                error!("{}: {}", dir_name(&results), e);
                report.failed += 1;
            }
        }
    }
    info!("maketime: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maketime_script() {
        let script = MaketimeScript {
            filter_file: "/data/10412-01-01-00/stdprod/xp10412010100.xfl".to_string(),
            gti: PathBuf::from("/data/10412-01-01-00-results/Analysis/good.gti"),
            expression: "(ELV > 4) && (OFFSET < 0.1)".to_string(),
        };
        assert_eq!(
            script.to_string(),
            "/data/10412-01-01-00/stdprod/xp10412010100.xfl\n\
             /data/10412-01-01-00-results/Analysis/good.gti\n\
             (ELV > 4) && (OFFSET < 0.1)\n\
             no\n\
             TIME\n"
        );
    }

    #[test]
    fn test_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let lis = dir.path().join(XTEFILT_LIST);
        std::fs::write(&lis, "first.xfl\r\nsecond.xfl\n").unwrap();
        assert_eq!(first_line(&lis).unwrap(), "first.xfl");
    }
}
