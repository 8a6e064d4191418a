// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Spectral fitting with XSPEC.
 *
 * Every observation's `src.pha` is fit with the same model, the best fit is
 * saved as `bestfit.xcm`, and the fit statistics (optionally with model
 * fluxes) are gathered into a CSV table.
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;

use super::{p, require_file, write_lines, RunOptions, StageError};
use crate::config::EnergyRange;
use crate::heasoft::{require_tool, Tool};
use crate::layout::{analysis_dir, dir_name, results_dirs};
use crate::pool::TaskReport;

const FLOAT: &str = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?";

lazy_static! {
    /// The models that can be asked for by name.
    pub static ref BUILTIN_MODELS: BTreeMap<&'static str, &'static str> = {
        let mut m = BTreeMap::new();
        m.insert("diskbb_pexrav", "tbabs(diskbb + pexrav)");
        m.insert("diskbb_powerlaw", "tbabs(diskbb + powerlaw)");
        m.insert("diskbb_only", "tbabs*diskbb");
        m.insert("powerlaw_only", "tbabs*powerlaw");
        m.insert("comptt", "tbabs*comptt");
        m
    };

    static ref RE_CHI2: Regex = Regex::new(&format!(r"Chi-Squared\s*=?\s*(?P<v>{})", FLOAT)).unwrap();
    static ref RE_DOF: Regex = Regex::new(r"for\s+(?P<v>\d+)\s+degrees of freedom").unwrap();
    static ref RE_REDUCED: Regex =
        Regex::new(&format!(r"Reduced chi-squared\s*=\s*(?P<v>{})", FLOAT)).unwrap();
    static ref RE_FLUX: Regex = Regex::new(&format!(
        r"Model Flux\s+{f}\s+photons\s+\((?P<flux>{f})\s+ergs/cm\^2/s\)\s+range\s+\((?P<lo>{f})\s*-\s*(?P<hi>{f})\s+keV\)",
        f = FLOAT
    ))
    .unwrap();
}

/// Turn a model name into an XSPEC model expression. Names are looked up in
/// `extra` first, then the built-in models; anything else is assumed to
/// already be an expression.
pub fn resolve_model(name: &str, extra: &BTreeMap<String, String>) -> String {
    if let Some(e) = extra.get(name) {
        return e.clone();
    }
    match BUILTIN_MODELS.get(name) {
        Some(e) => e.to_string(),
        None => name.to_string(),
    }
}

/// Starting values for the model's parameters, in the order XSPEC asks for
/// them. Only the disk blackbody, power-law and reflection combinations have
/// any; other models start from XSPEC's defaults.
pub fn initial_parameters(expr: &str) -> &'static [&'static str] {
    let diskbb = expr.contains("diskbb");
    if diskbb && expr.contains("pexrav") {
        &[
            "5.5 0.05 2.0 2.00 9.0 10.0",
            "1.2 0.01 1.0 1 3.0 4.0",
            "400",
            "2.0 0.01 1.3 1.4 3.0 4.0",
            "30",
            "1",
            "0 -1",
            "1 -1",
            "1 -1",
            "0.25 -1",
            "15",
        ]
    } else if diskbb && expr.contains("powerlaw") {
        &["5.5", "1.2", "400", "2.0", "15"]
    } else if diskbb {
        &["5.5", "1.2", "400"]
    } else if expr.contains("powerlaw") {
        &["5.5", "2.0", "15"]
    } else {
        &[]
    }
}

#[derive(Debug, Clone)]
pub struct FitParams {
    /// The model expression, e.g. `tbabs*diskbb`.
    pub model: String,
    pub energy_range: EnergyRange,
    pub max_iterations: u32,
    /// Plot the fit in this format; `None` skips plotting.
    pub plot_format: Option<String>,
    pub flux_bands: Vec<(f64, f64)>,
}

#[derive(Debug)]
pub struct FitScript<'a> {
    pub params: &'a FitParams,
    pub analysis: PathBuf,
}

impl<'a> std::fmt::Display for FitScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let a = &self.analysis;
        let mut lines = vec![
            format!("da {}", p(&a.join("src.pha"))),
            p(&a.join("rsp.pha")),
            p(&a.join("bkg.pha")),
            format!("ig **-{}", self.params.energy_range.min),
            format!("ig {}-**", self.params.energy_range.max),
            "setp e".to_string(),
            format!("model {}", self.params.model),
        ];
        lines.extend(initial_parameters(&self.params.model).iter().map(|s| s.to_string()));
        lines.push(format!("fit {}", self.params.max_iterations));
        lines.push(format!("save all {}", p(&a.join("bestfit.xcm"))));
        if let Some(fmt) = &self.params.plot_format {
            lines.push("cpd /xw".to_string());
            lines.push("pl ld chi uf euf residual".to_string());
            lines.push(format!("hardcopy {}/{}", p(&a.join(format!("spectralfit.{}", fmt))), fmt));
        }
        lines.push("exit".to_string());
        write_lines(f, &lines)
    }
}

#[derive(Debug)]
pub struct FluxScript<'a> {
    pub bestfit: PathBuf,
    pub bands: &'a [(f64, f64)],
}

impl<'a> std::fmt::Display for FluxScript<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = vec![format!("@{}", p(&self.bestfit)), "fit".to_string()];
        lines.extend(self.bands.iter().map(|(lo, hi)| format!("flux {} {}", lo, hi)));
        lines.push("exit".to_string());
        write_lines(f, &lines)
    }
}

/// An energy band written as `lo-hi` (keV).
pub fn parse_band(s: &str) -> Result<(f64, f64), StageError> {
    let bad = || StageError::InvalidArgument(format!("Invalid energy band '{}'; expected e.g. 2-10", s));
    let (lo, hi) = s.split_once('-').ok_or_else(bad)?;
    let lo: f64 = lo.trim().parse().map_err(|_| bad())?;
    let hi: f64 = hi.trim().parse().map_err(|_| bad())?;
    if lo >= hi {
        return Err(bad());
    }
    Ok((lo, hi))
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FitStatistics {
    pub chi2: Option<f64>,
    pub dof: Option<u32>,
    pub reduced_chi2: Option<f64>,
}

fn last_capture<T: FromStr>(re: &Regex, text: &str, group: &str) -> Option<T> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c[group].parse().ok())
}

/// Pull the final fit statistics out of an XSPEC log. XSPEC prints them after
/// every iteration batch, so the last of each wins.
pub fn parse_fit_log(log: &str) -> FitStatistics {
    FitStatistics {
        chi2: last_capture(&RE_CHI2, log, "v"),
        dof: last_capture(&RE_DOF, log, "v"),
        reduced_chi2: last_capture(&RE_REDUCED, log, "v"),
    }
}

/// A model flux in erg/cm^2/s over an energy band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandFlux {
    pub emin: f64,
    pub emax: f64,
    pub flux: f64,
}

pub fn parse_flux_log(log: &str) -> Vec<BandFlux> {
    RE_FLUX
        .captures_iter(log)
        .filter_map(|c| {
            Some(BandFlux {
                emin: c["lo"].parse().ok()?,
                emax: c["hi"].parse().ok()?,
                flux: c["flux"].parse().ok()?,
            })
        })
        .collect()
}

/// The outcome of fitting one observation.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub obsid: String,
    pub stats: FitStatistics,
    /// One entry per requested band; `None` if XSPEC didn't report it.
    pub fluxes: Vec<Option<f64>>,
    pub error: Option<String>,
}

fn fit_one(results: &Path, params: &FitParams, opts: &RunOptions) -> Result<(FitStatistics, Vec<Option<f64>>), StageError> {
    let analysis = analysis_dir(results);
    for f in &["src.pha", "bkg.pha", "rsp.pha"] {
        require_file(&analysis.join(f))?;
    }

    let log = analysis.join("xspec_fit.log");
    Tool::new("xspec")
        .script(
            analysis.join("xspec_fit.txt"),
            &FitScript {
                params,
                analysis: analysis.clone(),
            },
        )
        .current_dir(&analysis)
        .log_to(&log)
        .keep_script(opts.keep_scripts)
        .run()?;
    let stats = parse_fit_log(&std::fs::read_to_string(&log)?);

    if params.flux_bands.is_empty() {
        return Ok((stats, vec![]));
    }
    let bestfit = analysis.join("bestfit.xcm");
    require_file(&bestfit)?;
    let flux_log = analysis.join("flux_calc.log");
    Tool::new("xspec")
        .script(
            analysis.join("flux_calc.txt"),
            &FluxScript {
                bestfit,
                bands: &params.flux_bands,
            },
        )
        .current_dir(&analysis)
        .log_to(&flux_log)
        .keep_script(opts.keep_scripts)
        .run()?;
    let reported = parse_flux_log(&std::fs::read_to_string(&flux_log)?);
    let fluxes = params
        .flux_bands
        .iter()
        .map(|(lo, hi)| {
            reported
                .iter()
                .find(|b| (b.emin - lo).abs() < 1e-6 && (b.emax - hi).abs() < 1e-6)
                .map(|b| b.flux)
        })
        .collect();
    Ok((stats, fluxes))
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// Write fit results as CSV, one row per observation.
pub fn write_results_csv<W: std::io::Write>(
    out: W,
    model: &str,
    bands: &[(f64, f64)],
    results: &[FitResult],
) -> Result<(), csv::Error> {
    let mut w = csv::Writer::from_writer(out);
    let mut header = vec![
        "obsid".to_string(),
        "model".to_string(),
        "chi2".to_string(),
        "dof".to_string(),
        "reduced_chi2".to_string(),
    ];
    header.extend(bands.iter().map(|(lo, hi)| format!("flux_{}_{}", lo, hi)));
    header.push("error".to_string());
    w.write_record(&header)?;

    for r in results {
        let mut row = vec![
            r.obsid.clone(),
            model.to_string(),
            opt(&r.stats.chi2),
            opt(&r.stats.dof),
            opt(&r.stats.reduced_chi2),
        ];
        for i in 0..bands.len() {
            row.push(r.fluxes.get(i).map(opt).unwrap_or_default());
        }
        row.push(r.error.clone().unwrap_or_default());
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

/// Fit every observation under `root`, then write the table to `output_csv`.
pub fn fit_all_spectra(
    root: &Path,
    params: &FitParams,
    output_csv: &Path,
    opts: &RunOptions,
) -> Result<TaskReport, StageError> {
    require_tool("xspec")?;
    let dirs = results_dirs(root)?;
    info!("Fitting {} spectra with model {}", dirs.len(), params.model);

    let mut report = TaskReport::default();
    let mut results = Vec::with_capacity(dirs.len());
    for d in &dirs {
        let obsid = dir_name(d);
        match fit_one(d, params, opts) {
            Ok((stats, fluxes)) => {
                if stats.chi2.is_none() {
                    warn!("{}: no chi-squared found in the XSPEC log", obsid);
                }
                info!("{}: done", obsid);
                report.succeeded += 1;
                results.push(FitResult {
                    obsid,
                    stats,
                    fluxes,
                    error: None,
                });
            }
            Err(e) => {
                error!("{}: {}", obsid, e);
                report.failed += 1;
                results.push(FitResult {
                    obsid,
                    stats: FitStatistics::default(),
                    fluxes: vec![],
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if !results.is_empty() {
        let f = std::fs::File::create(output_csv)?;
        write_results_csv(f, &params.model, &params.flux_bands, &results)?;
        info!("Results saved to {}", output_csv.display());
    }
    info!("xspec: {}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn params(model: &str) -> FitParams {
        FitParams {
            model: model.to_string(),
            energy_range: EnergyRange { min: 3.0, max: 30.0 },
            max_iterations: 1000,
            plot_format: Some("png".to_string()),
            flux_bands: vec![],
        }
    }

    #[test]
    fn test_resolve_model() {
        let mut extra = BTreeMap::new();
        extra.insert("bb".to_string(), "tbabs*bbody".to_string());
        extra.insert("comptt".to_string(), "phabs*comptt".to_string());
        assert_eq!(resolve_model("diskbb_only", &extra), "tbabs*diskbb");
        assert_eq!(resolve_model("bb", &extra), "tbabs*bbody");
        // Config wins over built-ins.
        assert_eq!(resolve_model("comptt", &extra), "phabs*comptt");
        assert_eq!(resolve_model("wabs*gaussian", &extra), "wabs*gaussian");
    }

    #[test]
    fn test_initial_parameters() {
        assert_eq!(initial_parameters("tbabs(diskbb + pexrav)").len(), 11);
        assert_eq!(initial_parameters("tbabs(diskbb + powerlaw)"), &["5.5", "1.2", "400", "2.0", "15"]);
        assert_eq!(initial_parameters("tbabs*diskbb"), &["5.5", "1.2", "400"]);
        assert_eq!(initial_parameters("tbabs*powerlaw"), &["5.5", "2.0", "15"]);
        assert!(initial_parameters("tbabs*comptt").is_empty());
    }

    #[test]
    fn test_fit_script() {
        let params = params("tbabs*diskbb");
        let script = FitScript {
            params: &params,
            analysis: PathBuf::from("/d/A-results/Analysis"),
        };
        assert_eq!(
            script.to_string(),
            "da /d/A-results/Analysis/src.pha\n\
             /d/A-results/Analysis/rsp.pha\n\
             /d/A-results/Analysis/bkg.pha\n\
             ig **-3\n\
             ig 30-**\n\
             setp e\n\
             model tbabs*diskbb\n\
             5.5\n1.2\n400\n\
             fit 1000\n\
             save all /d/A-results/Analysis/bestfit.xcm\n\
             cpd /xw\n\
             pl ld chi uf euf residual\n\
             hardcopy /d/A-results/Analysis/spectralfit.png/png\n\
             exit\n"
        );
    }

    #[test]
    fn test_fit_script_without_plots() {
        let mut params = params("tbabs(diskbb + pexrav)");
        params.plot_format = None;
        params.energy_range = EnergyRange { min: 2.5, max: 25.0 };
        let out = FitScript {
            params: &params,
            analysis: PathBuf::from("/a"),
        }
        .to_string();
        assert!(out.contains("ig **-2.5\nig 25-**\n"));
        assert!(out.contains("model tbabs(diskbb + pexrav)\n5.5 0.05 2.0 2.00 9.0 10.0\n"));
        assert!(out.contains("0.25 -1\n15\nfit 1000\n"));
        assert!(!out.contains("hardcopy"));
        assert!(out.ends_with("save all /a/bestfit.xcm\nexit\n"));
    }

    #[test]
    fn test_flux_script() {
        let bands = [(2.0, 10.0), (3.0, 20.0)];
        let script = FluxScript {
            bestfit: PathBuf::from("/a/bestfit.xcm"),
            bands: &bands,
        };
        assert_eq!(script.to_string(), "@/a/bestfit.xcm\nfit\nflux 2 10\nflux 3 20\nexit\n");
    }

    #[test]
    fn test_parse_fit_log_takes_last_values() {
        let log = "\
 Fit statistic  : Chi-Squared =         512.07 using 58 bins.
 Test statistic : Chi-Squared =         512.07 using 58 bins.
 Null hypothesis probability =   1.2e-80 with 52 degrees of freedom
                                   Parameters
 Chi-Squared  |beta|/N    Lvl        1:nH
 Fit statistic  : Chi-Squared =          61.34 using 58 bins.
 Test statistic : Chi-Squared =          61.34 using 58 bins.
 Reduced chi-squared =     1.1796 for     52 degrees of freedom
 Null hypothesis probability =   1.84e-01 with 52 degrees of freedom
";
        let stats = parse_fit_log(log);
        assert_abs_diff_eq!(stats.chi2.unwrap(), 61.34);
        assert_eq!(stats.dof, Some(52));
        assert_abs_diff_eq!(stats.reduced_chi2.unwrap(), 1.1796);

        assert_eq!(parse_fit_log("XSPEC version 12\nexit\n"), FitStatistics::default());
    }

    #[test]
    fn test_parse_flux_log() {
        let log = "\
 Model Flux  0.063211 photons (5.6089e-10 ergs/cm^2/s) range (2.0000 - 10.000 keV)
 Model Flux   0.11522 photons (1.2153e-09 ergs/cm^2/s) range (3.0000 - 20.000 keV)
";
        let fluxes = parse_flux_log(log);
        assert_eq!(fluxes.len(), 2);
        assert_abs_diff_eq!(fluxes[0].flux, 5.6089e-10);
        assert_abs_diff_eq!(fluxes[0].emin, 2.0);
        assert_abs_diff_eq!(fluxes[1].emax, 20.0);
    }

    #[test]
    fn test_parse_band() {
        assert_eq!(parse_band("2-10").unwrap(), (2.0, 10.0));
        assert_eq!(parse_band(" 3.5 - 20 ").unwrap(), (3.5, 20.0));
        assert!(parse_band("10-2").is_err());
        assert!(parse_band("ten").is_err());
    }

    #[test]
    fn test_results_csv() {
        let results = vec![
            FitResult {
                obsid: "A-results".to_string(),
                stats: FitStatistics {
                    chi2: Some(61.34),
                    dof: Some(52),
                    reduced_chi2: Some(1.1796),
                },
                fluxes: vec![Some(5.6e-10)],
                error: None,
            },
            FitResult {
                obsid: "B-results".to_string(),
                stats: FitStatistics::default(),
                fluxes: vec![],
                error: Some("Missing input: /d/B-results/Analysis/src.pha".to_string()),
            },
        ];
        let mut out = vec![];
        write_results_csv(&mut out, "tbabs*diskbb", &[(2.0, 10.0)], &results).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "obsid,model,chi2,dof,reduced_chi2,flux_2_10,error");
        assert_eq!(lines[1], "A-results,tbabs*diskbb,61.34,52,1.1796,0.00000000056,");
        assert_eq!(
            lines[2],
            "B-results,tbabs*diskbb,,,,,Missing input: /d/B-results/Analysis/src.pha"
        );
    }
}
