// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Running HEASoft tools.
 *
 * Every HEASoft tool asks its questions on stdin, one answer per line. The
 * answers are rendered into a "script" file, which becomes the tool's stdin;
 * the script is removed again once the tool has finished.
 */

pub mod error;

pub use error::HeasoftError;

use std::ffi::OsString;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, trace};

/// How many trailing lines of a tool's log are attached to a failure.
const LOG_TAIL_LINES: usize = 5;

/// Find an executable called `name` in the directories of `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(p: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(p) {
        Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(p: &Path) -> bool {
    p.is_file()
}

/// Fail early if a HEASoft tool can't be found.
pub fn require_tool(name: &str) -> Result<PathBuf, HeasoftError> {
    match find_in_path(name) {
        Some(p) => {
            debug!("Using {} at {}", name, p.display());
            Ok(p)
        }
        None => Err(HeasoftError::ToolNotFound(name.to_string())),
    }
}

/// A script file on disk. The file is removed when this is dropped, unless
/// it was told to stay.
struct ScriptFile {
    path: PathBuf,
    keep: bool,
}

impl ScriptFile {
    fn create(path: &Path, contents: &str, keep: bool) -> Result<Self, std::io::Error> {
        std::fs::write(path, contents)?;
        trace!("Wrote script {}:\n{}", path.display(), contents);
        Ok(Self {
            path: path.to_path_buf(),
            keep,
        })
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if !self.keep {
            // Nothing useful can be done if this fails.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A single invocation of a HEASoft tool.
#[derive(Debug)]
pub struct Tool {
    program: String,
    args: Vec<OsString>,
    script: Option<(PathBuf, String)>,
    cwd: Option<PathBuf>,
    log: Option<PathBuf>,
    keep_script: bool,
}

impl Tool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: vec![],
            script: None,
            cwd: None,
            log: None,
            keep_script: false,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Write `script` to `path` and feed it to the tool's stdin.
    pub fn script<P: AsRef<Path>, S: Display>(mut self, path: P, script: &S) -> Self {
        self.script = Some((path.as_ref().to_path_buf(), script.to_string()));
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Send both stdout and stderr to this file instead of capturing them.
    pub fn log_to<P: AsRef<Path>>(mut self, log: P) -> Self {
        self.log = Some(log.as_ref().to_path_buf());
        self
    }

    pub fn keep_script(mut self, keep: bool) -> Self {
        self.keep_script = keep;
        self
    }

    /// Run the tool to completion. Returns captured stdout (empty when
    /// logging to a file).
    pub fn run(self) -> Result<String, HeasoftError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(d) = &self.cwd {
            cmd.current_dir(d);
        }

        let _script = match &self.script {
            Some((path, contents)) => {
                let s = ScriptFile::create(path, contents, self.keep_script)?;
                cmd.stdin(File::open(path)?);
                Some(s)
            }
            None => {
                cmd.stdin(Stdio::null());
                None
            }
        };

        debug!("Running {} {:?}", self.program, self.args);
        let (status, stdout, stderr) = match &self.log {
            Some(log) => {
                let out = File::create(log)?;
                let err = out.try_clone()?;
                cmd.stdout(out).stderr(err);
                let status = cmd.status().map_err(|e| self.spawn_error(e))?;
                let stderr = if status.success() {
                    String::new()
                } else {
                    log_tail(log, LOG_TAIL_LINES)
                };
                (status, String::new(), stderr)
            }
            None => {
                let output = cmd.output().map_err(|e| self.spawn_error(e))?;
                (
                    output.status,
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                )
            }
        };

        if status.success() {
            Ok(stdout)
        } else {
            Err(HeasoftError::Failed {
                tool: self.program.clone(),
                status,
                stderr,
            })
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> HeasoftError {
        match e.kind() {
            ErrorKind::NotFound => HeasoftError::ToolNotFound(self.program.clone()),
            _ => HeasoftError::IO(e),
        }
    }
}

/// The last `n` lines of a log file, joined with "; ".
fn log_tail(log: &Path, n: usize) -> String {
    let lines: Vec<String> = match File::open(log) {
        Ok(f) => BufReader::new(f)
            .lines()
            .filter_map(|l| l.ok())
            .filter(|l| !l.trim().is_empty())
            .collect(),
        Err(_) => return format!("see {}", log.display()),
    };
    let start = lines.len().saturating_sub(n);
    format!("{} (see {})", lines[start..].join("; "), log.display())
}
