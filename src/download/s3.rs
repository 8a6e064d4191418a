// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Anonymous access to the public HEASARC bucket on S3: listing a prefix and
 * mirroring it to disk.
 */

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use super::http::{url_with_params, HttpClient};
use super::DownloadError;
use crate::pool::run_tasks;

lazy_static! {
    static ref RE_CONTENTS: Regex = Regex::new(r"(?s)<Contents>(.*?)</Contents>").unwrap();
    static ref RE_KEY: Regex = Regex::new(r"<Key>(.*?)</Key>").unwrap();
    static ref RE_SIZE: Regex = Regex::new(r"<Size>(\d+)</Size>").unwrap();
    static ref RE_TRUNCATED: Regex = Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").unwrap();
    static ref RE_NEXT_TOKEN: Regex =
        Regex::new(r"<NextContinuationToken>(.*?)</NextContinuationToken>").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct S3Object {
    pub key: String,
    pub size: u64,
}

/// One page of a `ListObjectsV2` answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub objects: Vec<S3Object>,
    /// Set when there are more pages to fetch.
    pub next_token: Option<String>,
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn parse_list_page(xml: &str) -> Result<ListPage, DownloadError> {
    if !xml.contains("<ListBucketResult") {
        return Err(DownloadError::BadResponse(
            "expected a ListBucketResult document".to_string(),
        ));
    }
    let mut objects = vec![];
    for c in RE_CONTENTS.captures_iter(xml) {
        let body = &c[1];
        let key = RE_KEY
            .captures(body)
            .map(|k| unescape_xml(&k[1]))
            .ok_or_else(|| DownloadError::BadResponse("object without a key".to_string()))?;
        let size = RE_SIZE
            .captures(body)
            .and_then(|s| s[1].parse().ok())
            .unwrap_or(0);
        objects.push(S3Object { key, size });
    }
    let next_token = if RE_TRUNCATED.is_match(xml) {
        RE_NEXT_TOKEN.captures(xml).map(|t| unescape_xml(&t[1]))
    } else {
        None
    };
    Ok(ListPage { objects, next_token })
}

/// A bucket in a particular region.
pub struct S3Bucket<'a, C: HttpClient + ?Sized> {
    client: &'a C,
    pub name: String,
    pub region: String,
}

impl<'a, C: HttpClient + ?Sized> S3Bucket<'a, C> {
    pub fn new(client: &'a C, name: &str, region: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
            region: region.to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("https://{}.s3.{}.amazonaws.com/", self.name, self.region)
    }

    pub fn object_url(&self, key: &str) -> Result<String, DownloadError> {
        let mut url = reqwest::Url::parse(&self.endpoint())
            .map_err(|e| DownloadError::InvalidArgument(format!("Bad bucket endpoint: {}", e)))?;
        url.set_path(key);
        Ok(url.into())
    }

    pub fn list_page(
        &self,
        prefix: &str,
        max_keys: Option<usize>,
        token: Option<&str>,
    ) -> Result<ListPage, DownloadError> {
        let max_keys = max_keys.map(|m| m.to_string());
        let mut params = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(m) = &max_keys {
            params.push(("max-keys", m.as_str()));
        }
        if let Some(t) = token {
            params.push(("continuation-token", t));
        }
        let body = self.client.get(&url_with_params(&self.endpoint(), &params)?)?;
        parse_list_page(&String::from_utf8_lossy(&body))
    }

    /// Every object under `prefix`, following continuation tokens.
    pub fn list_all(&self, prefix: &str) -> Result<Vec<S3Object>, DownloadError> {
        let mut objects = vec![];
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, None, token.as_deref())?;
            objects.extend(page.objects);
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Fetch `key` into `dest` via a `.part` file next to it, returning the
    /// bytes written.
    pub fn download(&self, key: &str, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part = dest.with_file_name(format!("{}.part", name));
        match self.client.get_to_file(&self.object_url(key)?, &part) {
            Ok(n) => {
                fs::rename(&part, dest)?;
                Ok(n)
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }
}

/// How many downloads to run at once for `n_files` files averaging
/// `avg_size_kb`. Small files get more workers.
pub fn choose_max_workers(n_files: usize, avg_size_kb: f64, cpus: usize) -> usize {
    let n = if avg_size_kb < 500.0 {
        n_files.min((10 * cpus).max(8)).min(64)
    } else {
        n_files.min((5 * cpus).max(4)).min(32)
    };
    n.max(1)
}

pub fn human_readable_size(bytes: f64) -> String {
    const GIB: f64 = (1u64 << 30) as f64;
    const MIB: f64 = (1u64 << 20) as f64;
    if bytes >= GIB {
        format!("{:.2} GB", bytes / GIB)
    } else {
        format!("{:.2} MB", bytes / MIB)
    }
}

/// The keys already fetched, kept as a sorted JSON array on disk. The file is
/// rewritten after every completed download.
pub struct DownloadRecord {
    path: PathBuf,
    keys: Mutex<BTreeSet<String>>,
}

impl DownloadRecord {
    pub fn load(path: &Path) -> Result<Self, DownloadError> {
        let keys = if path.exists() {
            let f = fs::File::open(path)?;
            serde_json::from_reader(std::io::BufReader::new(f))?
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            keys: Mutex::new(keys),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().map(|k| k.contains(key)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, key: &str) -> Result<(), DownloadError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| DownloadError::BadResponse("download record lock poisoned".to_string()))?;
        keys.insert(key.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = fs::File::create(&self.path)?;
        serde_json::to_writer_pretty(f, &*keys)?;
        Ok(())
    }
}

/// Where `key` lands under `local_dir`.
pub fn local_path(local_dir: &Path, prefix: &str, key: &str) -> PathBuf {
    let rel = key.strip_prefix(prefix).unwrap_or(key).trim_start_matches('/');
    local_dir.join(rel)
}

/// Mirror everything under `prefix` into `local_dir`. Keys in the record file
/// are skipped unless `overwrite` is set, in which case the record is
/// discarded first. Failed files are logged and left for the next run.
///
/// Returns the bytes fetched by this run and how long it took.
pub fn download_prefix<C: HttpClient + ?Sized>(
    bucket: &S3Bucket<C>,
    prefix: &str,
    local_dir: &Path,
    record_file: &Path,
    overwrite: bool,
) -> Result<(u64, Duration), DownloadError> {
    let objects = bucket.list_all(prefix)?;
    let total: u64 = objects.iter().map(|o| o.size).sum();
    info!(
        "Found {} files ({})",
        objects.len(),
        human_readable_size(total as f64)
    );

    if overwrite && record_file.exists() {
        fs::remove_file(record_file)?;
    }
    let record = DownloadRecord::load(record_file)?;
    let pending: Vec<&S3Object> = objects.iter().filter(|o| !record.contains(&o.key)).collect();
    if pending.len() < objects.len() {
        info!("{} files already downloaded", objects.len() - pending.len());
    }

    let avg_kb = if objects.is_empty() {
        0.0
    } else {
        total as f64 / objects.len() as f64 / 1024.0
    };
    let workers = choose_max_workers(objects.len(), avg_kb, num_cpus::get());
    debug!("Using {} parallel workers", workers);

    let pb = ProgressBar::new(pending.iter().map(|o| o.size).sum());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}{percent}% [{bar:34.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) [{elapsed_precise}<{eta_precise}]")
            .progress_chars("#>-"),
    );

    let fetched = AtomicU64::new(0);
    let start = Instant::now();
    let report = run_tasks(
        workers,
        &pending,
        |o| o.key.clone(),
        |o| {
            let n = bucket.download(&o.key, &local_path(local_dir, prefix, &o.key))?;
            fetched.fetch_add(n, Ordering::Relaxed);
            pb.inc(n);
            record.add(&o.key)
        },
    )?;
    let elapsed = start.elapsed();
    pb.finish_and_clear();
    if report.failed > 0 {
        info!("{} of {} files failed; run again to retry them", report.failed, report.total());
    }
    Ok((fetched.load(Ordering::Relaxed), elapsed))
}
