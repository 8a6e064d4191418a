// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Tests for the autorxte command-line interface. HEASoft isn't needed; where
 * a tool has to run, a small shell script stands in for it.
 */

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use assert_cmd::Command;
    use tempfile::TempDir;

    /// A data directory plus an empty config file, so that no config on the
    /// machine running the tests gets picked up.
    struct Setup {
        dir: TempDir,
        config: PathBuf,
    }

    impl Setup {
        fn new() -> Setup {
            let dir = tempfile::tempdir().unwrap();
            let config = dir.path().join("config.yaml");
            fs::write(&config, "").unwrap();
            fs::create_dir(dir.path().join("data")).unwrap();
            Setup { dir, config }
        }

        fn data(&self) -> PathBuf {
            self.dir.path().join("data")
        }

        fn bin(&self) -> PathBuf {
            let bin = self.dir.path().join("bin");
            fs::create_dir_all(&bin).unwrap();
            bin
        }

        /// `autorxte --config <empty> <subcommand> -d <data>`, with only the
        /// fake tools and the system directories on the PATH.
        fn cmd(&self, subcommand: &str) -> Command {
            let mut cmd = Command::cargo_bin("autorxte").unwrap();
            cmd.env("PATH", format!("{}:/usr/bin:/bin", self.bin().display()))
                .env_remove("RUST_LOG")
                .arg("--config")
                .arg(&self.config)
                .arg(subcommand)
                .arg("-d")
                .arg(self.data());
            cmd
        }
    }

    fn stderr(a: assert_cmd::assert::Assert) -> String {
        String::from_utf8_lossy(&a.get_output().stderr).into_owned()
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let p = dir.join(name);
        fs::write(&p, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn missing_directory_fails() {
        let s = Setup::new();
        let a = Command::cargo_bin("autorxte")
            .unwrap()
            .arg("--config")
            .arg(&s.config)
            .arg("organize")
            .arg("-d")
            .arg("/road/to/no/where")
            .assert()
            .failure();
        assert!(stderr(a).contains("does not exist"));
    }

    #[test]
    fn bad_workers_are_rejected() {
        let s = Setup::new();
        s.cmd("prepare").arg("-w").arg("0").assert().failure();
        s.cmd("prepare").arg("-w").arg("lots").assert().failure();
    }

    #[test]
    fn missing_tool_fails() {
        let s = Setup::new();
        let a = s.cmd("prepare").assert().failure();
        assert!(stderr(a).contains("heainit"));
    }

    #[test]
    fn organize_moves_god_files() {
        let s = Setup::new();
        let data = s.data();
        fs::create_dir_all(data.join("10412-01-01-00")).unwrap();
        fs::write(data.join("10412-01-01-00/fits_files.god"), "FS4a_1\n").unwrap();
        fs::create_dir_all(data.join("10412-01-01-00-results")).unwrap();

        s.cmd("organize").assert().success();
        assert_eq!(
            fs::read_to_string(data.join("10412-01-01-00-results/Analysis/fits_files.god")).unwrap(),
            "FS4a_1\n"
        );
        assert!(!data.join("10412-01-01-00/fits_files.god").exists());
    }

    #[test]
    fn organize_can_copy() {
        let s = Setup::new();
        let data = s.data();
        fs::create_dir_all(data.join("10412-01-01-00")).unwrap();
        fs::write(data.join("10412-01-01-00/fits_files.god"), "FS4a_1\n").unwrap();
        fs::create_dir_all(data.join("10412-01-01-00-results")).unwrap();

        s.cmd("organize").arg("--copy").assert().success();
        assert!(data.join("10412-01-01-00-results/Analysis/fits_files.god").exists());
        assert!(data.join("10412-01-01-00/fits_files.god").exists());
    }

    #[test]
    fn xenon_lists_are_written() {
        let s = Setup::new();
        let analysis = s.data().join("20401-01-01-00-results/Analysis");
        fs::create_dir_all(&analysis).unwrap();
        for f in &["xenon_event_gx1", "xenon_event_gx0", "notes.txt"] {
            fs::write(analysis.join(f), "").unwrap();
        }

        s.cmd("xenon-lists").assert().success();
        let list = fs::read_to_string(analysis.join("xenon_event_files.txt")).unwrap();
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("xenon_event_gx0"));
        assert!(lines[1].ends_with("xenon_event_gx1"));
    }

    #[cfg(unix)]
    #[test]
    fn prepare_runs_pcaprepobsid() {
        let s = Setup::new();
        let data = s.data();
        fs::create_dir_all(data.join("10412-01-01-00")).unwrap();
        fs::create_dir_all(data.join("10412-01-02-00")).unwrap();
        // Already prepared, so skipped.
        fs::create_dir_all(data.join("10412-01-02-00-results")).unwrap();
        fake_tool(
            &s.bin(),
            "pcaprepobsid",
            r#"for a in "$@"; do case "$a" in outdir=*) mkdir -p "${a#outdir=}"; touch "${a#outdir=}/made";; esac; done"#,
        );

        s.cmd("prepare").arg("-w").arg("2").assert().success();
        assert!(data.join("10412-01-01-00-results/made").exists());
        assert!(!data.join("10412-01-02-00-results/made").exists());
    }

    #[cfg(unix)]
    #[test]
    fn filter_feeds_maketime_its_answers() {
        let s = Setup::new();
        let results = s.data().join("10412-01-01-00-results");
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join("FP_xtefilt.lis"), "/data/xp10412010100.xfl\n").unwrap();
        // Record stdin next to the GTI it was asked to make.
        fake_tool(
            &s.bin(),
            "maketime",
            r#"read xfl; read gti; read expr; echo "$xfl|$expr" > "$gti""#,
        );

        s.cmd("filter").arg("-e").arg("ELV > 4").assert().success();
        let gti = fs::read_to_string(results.join("Analysis/good.gti")).unwrap();
        assert_eq!(gti, "/data/xp10412010100.xfl|ELV > 4\n");
        // The script is cleaned up by default.
        assert!(!results.join("maketime_script.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_tasks_do_not_fail_the_run() {
        let s = Setup::new();
        fs::create_dir_all(s.data().join("10412-01-01-00")).unwrap();
        fake_tool(&s.bin(), "pcaprepobsid", "echo broken >&2; exit 3");
        let a = s.cmd("prepare").assert().success();
        assert!(stderr(a).contains("0 succeeded, 1 failed"));
    }

    #[test]
    fn plot_multi_needs_files() {
        Command::cargo_bin("autorxte")
            .unwrap()
            .arg("plot-multi")
            .assert()
            .failure();
    }
}
