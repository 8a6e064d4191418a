// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Search the HEASARC archive for RXTE observations of a source and mirror
 * them from the public S3 bucket.
 */

mod error;
pub mod heasarc;
pub mod http;
pub mod region;
pub mod s3;

pub use error::DownloadError;
pub use heasarc::{Filters, Observation, Selection};
pub use http::{HttpClient, ReqwestClient};

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::pool::TaskReport;
use crate::prompt::Prompter;
use s3::{download_prefix, human_readable_size, S3Bucket};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// A name for Sesame, or `"ra dec"` in degrees.
    pub source: String,
    pub catalog: String,
    pub radius_arcmin: f64,
    pub output_dir: PathBuf,
    pub filters: Filters,
    pub selection: Selection,
    /// `None` means "not said"; interactive runs ask, others don't overwrite.
    pub overwrite: Option<bool>,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub source_name: String,
    pub download_dir: PathBuf,
    /// Per observation.
    pub report: TaskReport,
    pub bytes: u64,
}

/// `<output>/download_RXTE_<source>`
pub fn download_dir(output_dir: &Path, source_name: &str) -> PathBuf {
    output_dir.join(format!("download_RXTE_{}", source_name))
}

/// `<download dir>/downloaded_RXTE_<source>.json`
pub fn record_file(download_dir: &Path, source_name: &str) -> PathBuf {
    download_dir.join(format!("downloaded_RXTE_{}.json", source_name))
}

/// Resolve the source, query the catalogue and apply the filters.
pub fn search<C: HttpClient + ?Sized>(client: &C, req: &DownloadRequest) -> Result<Vec<Observation>, DownloadError> {
    let pos = heasarc::resolve_source(client, &req.source)?;
    info!("Searching {} (RA={:.3}, Dec={:.3})", req.source, pos.ra, pos.dec);
    let observations = heasarc::query_observations(client, &req.catalog, pos, req.radius_arcmin)?;
    info!("Found {} observations", observations.len());
    if req.filters.is_empty() {
        return Ok(observations);
    }
    let observations = req.filters.apply(observations);
    info!("After filters: {} observations", observations.len());
    Ok(observations)
}

/// Fetch each of `selected` into `<download dir>/<obsid>/`. An observation
/// that fails is logged and counted; the rest carry on.
pub fn download_observations<C: HttpClient + ?Sized>(
    client: &C,
    selected: &[Observation],
    source_name: &str,
    req: &DownloadRequest,
    overwrite: bool,
) -> Result<DownloadSummary, DownloadError> {
    let dir = download_dir(&req.output_dir, source_name);
    std::fs::create_dir_all(&dir)?;
    let record = record_file(&dir, source_name);
    let bucket = S3Bucket::new(client, &req.bucket, &req.region);
    info!("Downloading {} observations into {}", selected.len(), dir.display());

    let mut report = TaskReport::default();
    let mut bytes = 0;
    for o in selected {
        info!("Downloading ObsID {}", o.obsid);
        match download_prefix(&bucket, &o.archive_prefix(), &dir.join(&o.obsid), &record, overwrite) {
            Ok((n, elapsed)) => {
                let secs = elapsed.as_secs_f64();
                let speed = if secs > 0.0 { n as f64 / secs } else { 0.0 };
                info!(
                    "ObsID {}: {} in {:.1}s ({}/s)",
                    o.obsid,
                    human_readable_size(n as f64),
                    secs,
                    human_readable_size(speed)
                );
                bytes += n;
                report.succeeded += 1;
            }
            Err(e) => {
                error!("ObsID {}: {}", o.obsid, e);
                report.failed += 1;
            }
        }
    }
    info!("Downloads complete: {}", report);
    Ok(DownloadSummary {
        source_name: source_name.to_string(),
        download_dir: dir,
        report,
        bytes,
    })
}

fn finish<C: HttpClient + ?Sized>(
    client: &C,
    filtered: &[Observation],
    selection: &Selection,
    req: &DownloadRequest,
    overwrite: bool,
) -> Result<DownloadSummary, DownloadError> {
    // The source name comes from everything that passed the filters, not just
    // the selection.
    let name = heasarc::source_name(filtered).ok_or_else(|| DownloadError::NoObservations(req.source.clone()))?;
    let selected = selection.select(filtered);
    if selected.is_empty() {
        warn!("Nothing selected to download");
    }
    download_observations(client, &selected, &name, req, overwrite)
}

pub fn search_and_download<C: HttpClient + ?Sized>(
    client: &C,
    req: &DownloadRequest,
) -> Result<DownloadSummary, DownloadError> {
    let filtered = search(client, req)?;
    finish(client, &filtered, &req.selection, req, req.overwrite.unwrap_or(false))
}

/// As `search_and_download`, but asks what to download when the request
/// doesn't say, and whether to overwrite when that isn't said either.
pub fn search_and_download_interactive<C, R, W>(
    client: &C,
    req: &DownloadRequest,
    prompter: &mut Prompter<R, W>,
) -> Result<DownloadSummary, DownloadError>
where
    C: HttpClient + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut filtered = search(client, req)?;
    let mut selection = req.selection.clone();
    if selection.is_all() && !filtered.is_empty() {
        let (s, min_exposure) = prompt_selection(prompter, &filtered)?;
        selection = s;
        if let Some(min) = min_exposure {
            let f = Filters {
                min_exposure: Some(min),
                ..Filters::default()
            };
            filtered = f.apply(filtered);
            info!("After filters: {} observations", filtered.len());
        }
    }
    let overwrite = match req.overwrite {
        Some(o) => o,
        None => prompter.yes_no("Overwrite existing downloads?", false)?,
    };
    finish(client, &filtered, &selection, req, overwrite)
}

/// Show a summary of the observations and ask which to fetch. The second
/// value is a minimum exposure, when that's what was chosen.
pub fn prompt_selection<R: BufRead, W: Write>(
    p: &mut Prompter<R, W>,
    observations: &[Observation],
) -> Result<(Selection, Option<f64>), DownloadError> {
    let mean = observations.iter().map(|o| o.exposure).sum::<f64>() / observations.len().max(1) as f64;
    p.say(format!("\nTotal observations: {}", observations.len()))?;
    p.say(format!("Mean exposure: {:.1} seconds", mean))?;
    for o in observations.iter().take(5) {
        p.say(format!(
            "  {:<16} {:<20} {}  {:>8.0} s",
            o.obsid,
            o.target_name,
            o.start().format("%Y-%m-%d %H:%M"),
            o.exposure
        ))?;
    }

    let n = observations.len() as i64;
    let choice = p.choice("What to download?", &["all", "top", "bottom", "min", "obsids"], Some("all"))?;
    Ok(match choice.as_str() {
        "top" => (Selection::Top(p.int("Top N observations", Some(5.min(n)), Some(1), Some(n))? as usize), None),
        "bottom" => (Selection::Bottom(p.int("Bottom N observations", Some(5.min(n)), Some(1), Some(n))? as usize), None),
        "min" => (Selection::All, Some(p.float("Minimum exposure", Some(100.0), Some(0.0), None)?)),
        "obsids" => {
            let ids = p.input("Comma-separated ObsIDs", None)?;
            let ids: Vec<String> = ids.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            (Selection::from_options(Some(ids), None, None), None)
        }
        _ => (Selection::All, None),
    })
}

/// Ask which region to use: a saved one, the fastest, a named one, or the
/// default. New choices can be saved to `region_file`.
pub fn prompt_region<C, R, W>(
    p: &mut Prompter<R, W>,
    client: &C,
    bucket: &str,
    region_file: Option<&Path>,
) -> Result<String, DownloadError>
where
    C: HttpClient + ?Sized,
    R: BufRead,
    W: Write,
{
    if let Some(saved) = region_file.and_then(region::load_preferred_region) {
        p.say(format!("\nPreviously used region: {}", saved))?;
        if p.yes_no("Use this region?", true)? {
            return Ok(saved);
        }
    }

    p.say("\nRegion selection:\n1) Auto-detect fastest region\n2) Specify region manually\n3) Use default (us-east-1)")?;
    let chosen = match p.choice("Choose option", &["1", "2", "3"], Some("1"))?.as_str() {
        "1" => region::find_fastest_region(client, bucket, &region::REGIONS),
        "2" => {
            for (i, r) in region::REGIONS.iter().enumerate() {
                p.say(format!("  {}) {}", i + 1, r))?;
            }
            p.input("Region name", Some(region::DEFAULT_REGION))?
        }
        _ => return Ok(region::DEFAULT_REGION.to_string()),
    };
    if let Some(f) = region_file {
        if p.yes_no("Save this region for future downloads?", true)? {
            region::save_preferred_region(f, &chosen)?;
        }
    }
    Ok(chosen)
}
