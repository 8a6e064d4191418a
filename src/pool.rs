// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * A bounded pool of workers, each running one task at a time.
 */

use std::fmt::Display;

use log::{error, info};
use rayon::prelude::*;

/// How many tasks of a stage succeeded or failed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Combine the counts of two reports.
    pub fn merge(self, other: TaskReport) -> TaskReport {
        TaskReport {
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
        }
    }
}

impl std::fmt::Display for TaskReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

/// Run `job` over all `tasks` with at most `workers` at once. Each outcome is
/// logged against the task's label. Completion order is not preserved and
/// failures are not retried.
pub fn run_tasks<T, L, J, E>(
    workers: usize,
    tasks: &[T],
    label: L,
    job: J,
) -> Result<TaskReport, rayon::ThreadPoolBuildError>
where
    T: Sync,
    L: Fn(&T) -> String + Sync,
    J: Fn(&T) -> Result<(), E> + Sync,
    E: Display,
{
    if tasks.is_empty() {
        return Ok(TaskReport::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;
    let outcomes: Vec<bool> = pool.install(|| {
        tasks
            .par_iter()
            .map(|t| match job(t) {
                Ok(()) => {
                    info!("{}: done", label(t));
                    true
                }
                Err(e) => {
                    error!("{}: {}", label(t), e);
                    false
                }
            })
            .collect()
    });

    let succeeded = outcomes.iter().filter(|&&o| o).count();
    Ok(TaskReport {
        succeeded,
        failed: outcomes.len() - succeeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_counts_successes_and_failures() {
        let tasks: Vec<u32> = (0..10).collect();
        let report = run_tasks(3, &tasks, |t| t.to_string(), |t| {
            if t % 3 == 0 {
                Err(format!("{} is a multiple of three", t))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failed, 4);
        assert_eq!(report.total(), 10);
    }

    #[test]
    fn test_every_task_runs_once() {
        let counter = AtomicUsize::new(0);
        let tasks = vec!["a"; 25];
        let report = run_tasks(0, &tasks, |t| t.to_string(), |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 25);
        assert_eq!(report, TaskReport { succeeded: 25, failed: 0 });
    }

    #[test]
    fn test_no_tasks() {
        let tasks: Vec<u8> = vec![];
        let report = run_tasks(4, &tasks, |_| String::new(), |_| Ok::<(), String>(())).unwrap();
        assert_eq!(report, TaskReport::default());
        assert_eq!(format!("{}", report), "0 succeeded, 0 failed");
    }
}
