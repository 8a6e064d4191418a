// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Run `pcaprepobsid` over every observation.

use std::path::{Path, PathBuf};

use log::info;

use super::{RunOptions, StageError};
use crate::heasoft::{require_tool, Tool};
use crate::layout::{dir_name, observation_dirs, results_dir_for};
use crate::pool::{run_tasks, TaskReport};

/// One observation to prepare.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareTask {
    pub observation: PathBuf,
    pub results: PathBuf,
}

/// Find the observations under `root` that need preparing. With
/// `skip_existing`, observations that already have a results directory are
/// left out.
pub fn find_tasks(root: &Path, skip_existing: bool) -> Result<Vec<PrepareTask>, StageError> {
    let mut tasks = vec![];
    for observation in observation_dirs(root)? {
        let results = results_dir_for(&observation);
        if skip_existing && results.is_dir() {
            info!("Skipping {}: {} exists", dir_name(&observation), dir_name(&results));
            continue;
        }
        tasks.push(PrepareTask {
            observation,
            results,
        });
    }
    Ok(tasks)
}

fn prepare_one(task: &PrepareTask) -> Result<(), StageError> {
    Tool::new("pcaprepobsid")
        .arg(format!("indir={}", task.observation.display()))
        .arg(format!("outdir={}", task.results.display()))
        .run()?;
    Ok(())
}

pub fn prepare_observations(
    root: &Path,
    skip_existing: bool,
    opts: &RunOptions,
) -> Result<TaskReport, StageError> {
    require_tool("pcaprepobsid")?;
    let tasks = find_tasks(root, skip_existing)?;
    info!("Preparing {} observations with {} workers", tasks.len(), opts.workers);
    let report = run_tasks(
        opts.workers,
        &tasks,
        |t| dir_name(&t.observation),
        prepare_one,
    )?;
    info!("pcaprepobsid: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_tasks() {
        let root = tempfile::tempdir().unwrap();
        for d in &["10412-01-01-00", "10412-01-02-00", "10412-01-02-00-results", "misc"] {
            std::fs::create_dir(root.path().join(d)).unwrap();
        }

        let tasks = find_tasks(root.path(), true).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].observation, root.path().join("10412-01-01-00"));
        assert_eq!(tasks[0].results, root.path().join("10412-01-01-00-results"));

        // Without skipping, results dirs are still never treated as
        // observations.
        let tasks = find_tasks(root.path(), false).unwrap();
        let names: Vec<String> = tasks.iter().map(|t| dir_name(&t.observation)).collect();
        assert_eq!(names, vec!["10412-01-01-00", "10412-01-02-00"]);
    }
}
