// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Picking, and remembering, the S3 region to download from.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::http::HttpClient;
use super::s3::S3Bucket;
use super::DownloadError;

pub const DEFAULT_REGION: &str = "us-east-1";

/// The regions tried when looking for the fastest.
pub const REGIONS: [&str; 21] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "eu-south-1",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-east-1",
    "sa-east-1",
    "me-south-1",
    "af-south-1",
    "ca-central-1",
];

const PROBE_PREFIX: &str = "rxte/";
const PROBE_KEYS: usize = 10;

/// Score a region by how quickly it lists a few keys (`1/latency`, bigger is
/// better). `None` if it didn't answer.
pub fn probe_region<C: HttpClient + ?Sized>(client: &C, bucket: &str, region: &str) -> Option<f64> {
    let b = S3Bucket::new(client, bucket, region);
    let start = Instant::now();
    match b.list_page(PROBE_PREFIX, Some(PROBE_KEYS), None) {
        Ok(_) => {
            let secs = start.elapsed().as_secs_f64();
            Some(1.0 / secs.max(1e-6))
        }
        Err(e) => {
            debug!("Region {} failed: {}", region, e);
            None
        }
    }
}

pub fn find_fastest_region<C: HttpClient + ?Sized>(client: &C, bucket: &str, regions: &[&str]) -> String {
    info!("Testing {} regions", regions.len());
    let mut best: Option<(&str, f64)> = None;
    for &region in regions {
        if let Some(score) = probe_region(client, bucket, region) {
            info!("  {}: {:.2}", region, score);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((region, score));
            }
        }
    }
    match best {
        Some((region, _)) => {
            info!("Fastest region: {}", region);
            region.to_string()
        }
        None => {
            warn!("No regions responded, using {}", DEFAULT_REGION);
            DEFAULT_REGION.to_string()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedRegion {
    region: String,
    saved_at: String,
}

/// `~/.autorxte/download_region.json`
pub fn default_region_file() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".autorxte").join("download_region.json"))
}

pub fn save_preferred_region(path: &Path, region: &str) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let saved = SavedRegion {
        region: region.to_string(),
        saved_at: Utc::now().to_rfc3339(),
    };
    fs::write(path, serde_json::to_string(&saved)?)?;
    info!("Saved preferred region: {}", region);
    Ok(())
}

/// The saved region, if there is one and it can be read.
pub fn load_preferred_region(path: &Path) -> Option<String> {
    let s = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<SavedRegion>(&s) {
        Ok(saved) => Some(saved.region),
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            None
        }
    }
}
