// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * User configuration, read from YAML.
 *
 * Every key is optional. Anything missing from the file takes the built-in
 * default, so an empty file (or no file at all) is a valid configuration.
 */

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// The name of a config file looked for in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "autorxte_config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("Couldn't parse {file}: {err}")]
    Parse {
        file: PathBuf,
        err: serde_yaml::Error,
    },

    #[error("Invalid worker count '{0}'; expected a positive integer or \"auto\"")]
    BadWorkers(String),

    #[error("{0}")]
    IO(#[from] std::io::Error),
}

/// A number of workers, possibly left to be decided by the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WorkersRepr")]
pub enum Workers {
    Auto,
    Fixed(usize),
}

impl Default for Workers {
    fn default() -> Self {
        Workers::Auto
    }
}

impl FromStr for Workers {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Workers::Auto);
        }
        match s.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Workers::Fixed(n)),
            _ => Err(ConfigError::BadWorkers(s.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkersRepr {
    Number(usize),
    Text(String),
}

impl TryFrom<WorkersRepr> for Workers {
    type Error = ConfigError;

    fn try_from(r: WorkersRepr) -> Result<Self, Self::Error> {
        match r {
            WorkersRepr::Number(0) => Err(ConfigError::BadWorkers("0".to_string())),
            WorkersRepr::Number(n) => Ok(Workers::Fixed(n)),
            WorkersRepr::Text(s) => s.parse(),
        }
    }
}

/// Accept either a YAML string or a number for values that are handed to
/// HEASoft tools verbatim (e.g. `binning: -1`).
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Repr::deserialize(d)? {
        Repr::Text(s) => s,
        Repr::Int(i) => i.to_string(),
        Repr::Float(f) => f.to_string(),
    })
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub auto_workers: bool,
    pub default_workers: usize,
    pub log_level: String,
    pub cleanup_temp_files: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            auto_workers: true,
            default_workers: 4,
            log_level: "INFO".to_string(),
            cleanup_temp_files: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "nasa-heasarc".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub workers: Workers,
    pub s3: S3Config,
    pub catalog: String,
    pub radius_arcmin: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: Workers::Auto,
            s3: S3Config::default(),
            catalog: "xtemaster".to_string(),
            radius_arcmin: 5.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PreparationConfig {
    pub workers: Workers,
    pub skip_existing: bool,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            workers: Workers::Auto,
            skip_existing: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    pub move_mode: bool,
    pub overwrite: bool,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            move_mode: true,
            overwrite: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BitmaskConfig {
    pub e_token_bitmask: String,
    pub xenon_bitmask: String,
    pub overwrite: bool,
}

impl Default for BitmaskConfig {
    fn default() -> Self {
        Self {
            e_token_bitmask: "bitmask_event".to_string(),
            xenon_bitmask: "bitmask_xenon".to_string(),
            overwrite: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    pub filter_expression: String,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            filter_expression: "(ELV > 4) && (OFFSET < 0.1) && (NUM_PCU_ON > 0) && .NOT. ISNULL(ELV) && (NUM_PCU_ON < 6)".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub token: String,
    pub bitmask: String,
    pub prefix: String,
    pub split_gti: bool,
    pub workers: Workers,
    pub time_bin: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            token: "e".to_string(),
            bitmask: "bitmask_event".to_string(),
            prefix: "event".to_string(),
            split_gti: false,
            workers: Workers::Auto,
            time_bin: 0.004,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Std1Config {
    pub output_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub pcu_selection: String,
    pub bin_size_sec: f64,
}

impl Default for Std1Config {
    fn default() -> Self {
        Self {
            output_name: "std1.lc".to_string(),
            pcu_selection: "2".to_string(),
            bin_size_sec: 0.125,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Std2Config {
    pub output_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub pcu_selection: String,
    pub energy_channels: String,
    pub time_bins: u32,
}

impl Default for Std2Config {
    fn default() -> Self {
        Self {
            output_name: "light.lc".to_string(),
            pcu_selection: "2".to_string(),
            energy_channels: "ALL".to_string(),
            time_bins: 16,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LightcurveConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub std1: Std1Config,
    pub std2: Std2Config,
    pub workers: Workers,
}

impl Default for LightcurveConfig {
    fn default() -> Self {
        Self {
            kind: "std2".to_string(),
            std1: Std1Config::default(),
            std2: Std2Config::default(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpectraConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub pcu_selection: String,
    pub energy_channels: String,
    pub source_file: String,
    pub background_file: String,
    pub response_file: String,
    pub workers: Workers,
}

impl Default for SpectraConfig {
    fn default() -> Self {
        Self {
            pcu_selection: "2".to_string(),
            energy_channels: "ALL".to_string(),
            source_file: "src.pha".to_string(),
            background_file: "bkg.pha".to_string(),
            response_file: "rsp.pha".to_string(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PdsConfig {
    pub input_lightcurve: String,
    #[serde(deserialize_with = "string_or_number")]
    pub binning: String,
    #[serde(deserialize_with = "string_or_number")]
    pub rebin: String,
    pub max_bins: u64,
    pub window: String,
    pub norm: i32,
    pub output_png: String,
    pub workers: Workers,
}

impl Default for PdsConfig {
    fn default() -> Self {
        Self {
            input_lightcurve: "event.lc".to_string(),
            binning: "-1".to_string(),
            rebin: "-1.03".to_string(),
            max_bins: 8192,
            window: "none".to_string(),
            norm: -2,
            output_png: "pds.png/png".to_string(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Channel ranges, keyed by colour name.
    pub ranges: BTreeMap<String, String>,
    pub color_names: Vec<String>,
    pub time_bin: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub lcurve_bin_size: String,
    pub max_bins: u64,
    pub plot_format: String,
    pub workers: Workers,
}

impl Default for ColorConfig {
    fn default() -> Self {
        let ranges = [("soft", "0-13"), ("medium", "14-35"), ("hard", "36-255")]
            .iter()
            .map(|(n, r)| (n.to_string(), r.to_string()))
            .collect();
        Self {
            ranges,
            color_names: vec!["soft".to_string(), "medium".to_string(), "hard".to_string()],
            time_bin: 0.04,
            lcurve_bin_size: "-1".to_string(),
            max_bins: 2_000_000,
            plot_format: "png".to_string(),
            workers: Workers::Auto,
        }
    }
}

impl ColorConfig {
    /// The channel range of each named colour, in order. Names without a
    /// configured range give `None`.
    pub fn ranges_for(&self, names: &[String]) -> Vec<Option<String>> {
        names
            .iter()
            .map(|n| self.ranges.get(n).cloned())
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct EnergyRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct XspecConfig {
    pub default_model: String,
    pub energy_range: EnergyRange,
    pub max_iterations: u32,
    pub save_plots: bool,
    pub plot_format: String,
    /// Extra `name: expression` models.
    pub models: BTreeMap<String, String>,
    pub workers: Workers,
}

impl Default for XspecConfig {
    fn default() -> Self {
        Self {
            default_model: "diskbb_pexrav".to_string(),
            energy_range: EnergyRange {
                min: 3.0,
                max: 30.0,
            },
            max_iterations: 1000,
            save_plots: true,
            plot_format: "png".to_string(),
            models: BTreeMap::new(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct XenonConfig {
    pub fits_extension: String,
    pub output_root: String,
    pub event_pattern: String,
    pub workers: Workers,
}

impl Default for XenonConfig {
    fn default() -> Self {
        Self {
            fits_extension: "XTE_SP".to_string(),
            output_root: "event".to_string(),
            event_pattern: "xenon_event_gx*".to_string(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlottingConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub bin_size: String,
    pub max_bins: u64,
    pub format: String,
    pub pattern: String,
    pub workers: Workers,
}

impl Default for PlottingConfig {
    fn default() -> Self {
        Self {
            bin_size: "1".to_string(),
            max_bins: 10000,
            format: "png".to_string(),
            pattern: "*.lc".to_string(),
            workers: Workers::Auto,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub download: DownloadConfig,
    pub preparation: PreparationConfig,
    pub organization: OrganizationConfig,
    pub bitmasks: BitmaskConfig,
    pub filtering: FilteringConfig,
    pub extraction: ExtractionConfig,
    pub lightcurves: LightcurveConfig,
    pub spectra: SpectraConfig,
    pub pds: PdsConfig,
    pub color_analysis: ColorConfig,
    pub xspec: XspecConfig,
    pub xenon: XenonConfig,
    pub plotting: PlottingConfig,
}

impl Config {
    pub fn from_yaml(s: &str) -> Result<Config, serde_yaml::Error> {
        // An empty document deserialises to unit, not a map.
        if s.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(s)
    }

    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Config, ConfigError> {
        let file = file.as_ref();
        if !file.exists() {
            return Err(ConfigError::NotFound(file.to_path_buf()));
        }
        let contents = std::fs::read_to_string(file)?;
        Config::from_yaml(&contents).map_err(|err| ConfigError::Parse {
            file: file.to_path_buf(),
            err,
        })
    }

    /// Load `explicit` if given. Otherwise use the first config file found
    /// in the search path, or the defaults if there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        if let Some(f) = explicit {
            debug!("Using config file {}", f.display());
            return Config::from_file(f);
        }
        for candidate in search_paths() {
            if candidate.exists() {
                debug!("Using config file {}", candidate.display());
                return Config::from_file(&candidate);
            }
        }
        debug!("No config file found; using defaults");
        Ok(Config::default())
    }

    /// Turn a worker setting into a concrete thread count.
    pub fn resolve_workers(&self, w: Workers) -> usize {
        match w {
            Workers::Fixed(n) => n,
            Workers::Auto if self.global.auto_workers => num_cpus::get(),
            Workers::Auto => self.global.default_workers.max(1),
        }
    }

    /// The thread count for a stage, preferring a command-line override.
    pub fn workers(&self, cli: Option<Workers>, section: Workers) -> usize {
        self.resolve_workers(cli.unwrap_or(section))
    }
}

/// Where config files are looked for, in priority order.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".autorxte").join("config.yaml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let c = Config::from_yaml("").unwrap();
        assert!(c.global.auto_workers);
        assert_eq!(c.global.default_workers, 4);
        assert_eq!(c.download.s3.bucket, "nasa-heasarc");
        assert_eq!(c.extraction.prefix, "event");
        assert_eq!(c.extraction.time_bin, 0.004);
        assert_eq!(c.lightcurves.kind, "std2");
        assert_eq!(c.lightcurves.std2.time_bins, 16);
        assert_eq!(c.pds.binning, "-1");
        assert_eq!(c.pds.rebin, "-1.03");
        assert_eq!(c.pds.max_bins, 8192);
        assert_eq!(c.xspec.energy_range, EnergyRange { min: 3.0, max: 30.0 });
        assert_eq!(c.xenon.event_pattern, "xenon_event_gx*");
        assert_eq!(
            c.color_analysis.ranges_for(&c.color_analysis.color_names),
            vec![
                Some("0-13".to_string()),
                Some("14-35".to_string()),
                Some("36-255".to_string())
            ]
        );
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
global:
  auto_workers: false
  default_workers: 6
extraction:
  token: xenon
  workers: 3
pds:
  binning: -1
  rebin: -1.05
  window: hanning
xspec:
  models:
    bbody: tbabs*bbody
"#;
        let c = Config::from_yaml(yaml).unwrap();
        // Overridden.
        assert_eq!(c.extraction.token, "xenon");
        assert_eq!(c.extraction.workers, Workers::Fixed(3));
        assert_eq!(c.pds.binning, "-1");
        assert_eq!(c.pds.rebin, "-1.05");
        assert_eq!(c.pds.window, "hanning");
        assert_eq!(c.xspec.models["bbody"], "tbabs*bbody");
        // Untouched siblings keep their defaults.
        assert_eq!(c.extraction.bitmask, "bitmask_event");
        assert_eq!(c.pds.norm, -2);
        assert!(c.global.cleanup_temp_files);

        assert_eq!(c.resolve_workers(Workers::Auto), 6);
        assert_eq!(c.workers(None, c.extraction.workers), 3);
        assert_eq!(c.workers(Some(Workers::Fixed(8)), c.extraction.workers), 8);
    }

    #[test]
    fn test_auto_workers_uses_cpus() {
        let c = Config::default();
        assert_eq!(c.resolve_workers(Workers::Auto), num_cpus::get());
    }

    #[test]
    fn test_workers_parsing() {
        assert_eq!("auto".parse::<Workers>().unwrap(), Workers::Auto);
        assert_eq!("AUTO".parse::<Workers>().unwrap(), Workers::Auto);
        assert_eq!("12".parse::<Workers>().unwrap(), Workers::Fixed(12));
        assert!("0".parse::<Workers>().is_err());
        assert!("lots".parse::<Workers>().is_err());

        assert!(Config::from_yaml("download:\n  workers: 0\n").is_err());
        assert!(Config::from_yaml("download:\n  workers: many\n").is_err());
        let c = Config::from_yaml("download:\n  workers: auto\n").unwrap();
        assert_eq!(c.download.workers, Workers::Auto);
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "organization:\n  move_mode: false").unwrap();
        let c = Config::from_file(f.path()).unwrap();
        assert!(!c.organization.move_mode);
        assert!(!c.organization.overwrite);

        let missing = Config::load(Some(Path::new("/no/such/autorxte_config.yaml")));
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_bad_yaml_names_the_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "global: [unclosed").unwrap();
        match Config::from_file(f.path()) {
            Err(ConfigError::Parse { file, .. }) => assert_eq!(file, f.path()),
            r => panic!("unexpected result: {:?}", r),
        }
    }
}
