// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Finding RXTE observations: source positions, the HEASARC master catalogue,
 * and picking which observations to fetch.
 */

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use itertools::Itertools;
use log::{debug, warn};

use super::http::{url_with_params, HttpClient};
use super::DownloadError;

const SESAME_URL: &str = "https://cds.unistra.fr/cgi-bin/nph-sesame/-oI/A";
const TAP_URL: &str = "https://heasarc.gsfc.nasa.gov/xamin/vo/tap/sync";

/// The MJD of 1970-01-01.
const MJD_UNIX_EPOCH: f64 = 40587.0;

/// ICRS coordinates [degrees].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub ra: f64,
    pub dec: f64,
}

/// Parse `"ra dec"` in degrees, separated by whitespace and/or a comma.
pub fn parse_position(s: &str) -> Option<Position> {
    let parts: Vec<&str> = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [ra, dec] => {
            let ra = ra.parse().ok()?;
            let dec: f64 = dec.parse().ok()?;
            if (-90.0..=90.0).contains(&dec) {
                Some(Position { ra, dec })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Pull the position out of a Sesame plain-text response, i.e. the line
/// `%J 083.633083 +22.014500 = 05:34:31.93 +22:00:52.2`.
pub fn parse_sesame(response: &str) -> Option<Position> {
    response
        .lines()
        .find_map(|l| l.strip_prefix("%J "))
        .and_then(|rest| {
            let mut it = rest.split_whitespace();
            let ra = it.next()?.parse().ok()?;
            let dec = it.next()?.parse().ok()?;
            Some(Position { ra, dec })
        })
}

fn sesame_url(name: &str) -> Result<String, DownloadError> {
    let mut url = reqwest::Url::parse(SESAME_URL)
        .map_err(|e| DownloadError::InvalidArgument(format!("Bad URL {}: {}", SESAME_URL, e)))?;
    url.set_query(Some(name.trim()));
    Ok(url.into())
}

/// Turn a source name or `"ra dec"` string into a position. Anything with a
/// letter in it is a name, and is looked up with Sesame.
pub fn resolve_source<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Position, DownloadError> {
    if source.chars().any(|c| c.is_ascii_alphabetic()) {
        let body = client.get(&sesame_url(source)?)?;
        let pos = parse_sesame(&String::from_utf8_lossy(&body)).ok_or_else(|| DownloadError::Resolve(source.to_string()))?;
        debug!("Sesame resolved {} to {:?}", source, pos);
        Ok(pos)
    } else {
        parse_position(source).ok_or_else(|| DownloadError::Resolve(source.to_string()))
    }
}

/// One row of the observation catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub obsid: String,
    pub target_name: String,
    /// Start time [MJD].
    pub time: f64,
    /// [seconds]
    pub exposure: f64,
    pub cycle: String,
}

impl Observation {
    pub fn start(&self) -> DateTime<Utc> {
        mjd_to_datetime(self.time)
    }

    /// Where this observation lives in the HEASARC S3 bucket.
    pub fn archive_prefix(&self) -> String {
        let proposal: String = self.obsid.chars().take(5).collect();
        format!(
            "rxte/data/archive/AO{}/P{}/{}/",
            self.cycle, proposal, self.obsid
        )
    }
}

pub fn mjd_to_datetime(mjd: f64) -> DateTime<Utc> {
    let millis = ((mjd - MJD_UNIX_EPOCH) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis(millis)
}

/// The TAP query for everything in `catalog` within `radius_arcmin` of `pos`.
pub fn catalog_query(catalog: &str, pos: Position, radius_arcmin: f64) -> String {
    format!(
        "SELECT * FROM {} WHERE CONTAINS(POINT('ICRS',ra,dec),CIRCLE('ICRS',{},{},{}))=1",
        catalog,
        pos.ra,
        pos.dec,
        radius_arcmin / 60.0
    )
}

pub fn query_observations<C: HttpClient + ?Sized>(
    client: &C,
    catalog: &str,
    pos: Position,
    radius_arcmin: f64,
) -> Result<Vec<Observation>, DownloadError> {
    let query = catalog_query(catalog, pos, radius_arcmin);
    debug!("HEASARC query: {}", query);
    let url = url_with_params(
        TAP_URL,
        &[
            ("REQUEST", "doQuery"),
            ("LANG", "ADQL"),
            ("FORMAT", "csv"),
            ("QUERY", &query),
        ],
    )?;
    let body = client.get(&url)?;
    parse_observations(&body[..])
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Read the catalogue's CSV answer. Rows missing an obsid, time or exposure
/// are dropped; the rest come back sorted by time.
pub fn parse_observations<R: std::io::Read>(csv_data: R) -> Result<Vec<Observation>, DownloadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_data);
    let headers = reader.headers()?.clone();
    let required = |name: &str| {
        column(&headers, name)
            .ok_or_else(|| DownloadError::BadResponse(format!("catalogue has no '{}' column", name)))
    };
    let obsid_col = required("obsid")?;
    let time_col = required("time")?;
    let exposure_col = required("exposure")?;
    let target_col = column(&headers, "target_name");
    let cycle_col = column(&headers, "cycle");

    let mut observations = vec![];
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let obsid = field(obsid_col);
        let (time, exposure) = (field(time_col), field(exposure_col));
        if obsid.is_empty() || time.is_empty() || exposure.is_empty() {
            continue;
        }
        let (time, exposure) = match (time.parse::<f64>(), exposure.parse::<f64>()) {
            (Ok(t), Ok(e)) => (t, e),
            _ => {
                warn!("Skipping {}: unreadable time or exposure", obsid);
                continue;
            }
        };
        observations.push(Observation {
            obsid: obsid.to_string(),
            target_name: target_col.map(field).unwrap_or("").to_string(),
            time,
            exposure,
            cycle: cycle_col.map(field).unwrap_or("").to_string(),
        });
    }
    observations.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    Ok(observations)
}

/// Cuts on the catalogue rows. The dates are inclusive bounds at midnight UTC.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub min_exposure: Option<f64>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

pub fn parse_date(s: &str) -> Result<NaiveDate, DownloadError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| DownloadError::InvalidArgument(format!("Bad date '{}' (expected YYYY-MM-DD): {}", s, e)))
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_hms(0, 0, 0))
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.min_exposure.is_none() && self.start.is_none() && self.end.is_none()
    }

    pub fn accepts(&self, o: &Observation) -> bool {
        if let Some(min) = self.min_exposure {
            if o.exposure < min {
                return false;
            }
        }
        let t = o.start();
        if let Some(start) = self.start {
            if t < midnight(start) {
                return false;
            }
        }
        if let Some(end) = self.end {
            if t > midnight(end) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, observations: Vec<Observation>) -> Vec<Observation> {
        observations.into_iter().filter(|o| self.accepts(o)).collect()
    }
}

/// Which of the (filtered) observations to download.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    ObsIds(Vec<String>),
    /// The N longest exposures.
    Top(usize),
    /// The N shortest exposures.
    Bottom(usize),
    All,
}

impl Selection {
    /// An explicit obsid list wins over top N, which wins over bottom N.
    pub fn from_options(obsids: Option<Vec<String>>, top: Option<usize>, bottom: Option<usize>) -> Selection {
        match (obsids, top, bottom) {
            (Some(ids), _, _) if !ids.is_empty() => Selection::ObsIds(ids),
            (_, Some(n), _) if n > 0 => Selection::Top(n),
            (_, _, Some(n)) if n > 0 => Selection::Bottom(n),
            _ => Selection::All,
        }
    }

    pub fn is_all(&self) -> bool {
        *self == Selection::All
    }

    pub fn select(&self, observations: &[Observation]) -> Vec<Observation> {
        let by_exposure = || {
            observations
                .iter()
                .cloned()
                .sorted_by(|a, b| a.exposure.partial_cmp(&b.exposure).unwrap_or(std::cmp::Ordering::Equal))
        };
        match self {
            Selection::ObsIds(ids) => observations
                .iter()
                .filter(|o| ids.iter().any(|id| id == &o.obsid))
                .cloned()
                .collect(),
            Selection::Top(n) => {
                let skip = observations.len().saturating_sub(*n);
                by_exposure().skip(skip).collect()
            }
            Selection::Bottom(n) => by_exposure().take(*n).collect(),
            Selection::All => observations.to_vec(),
        }
    }
}

/// The most common target name, ties going to the alphabetically first, made
/// safe for use in a directory name.
pub fn source_name(observations: &[Observation]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for o in observations {
        *counts.entry(o.target_name.as_str()).or_default() += 1;
    }
    // BTreeMap iterates alphabetically, and max_by_key keeps the last maximum,
    // so walk it backwards.
    counts
        .into_iter()
        .rev()
        .max_by_key(|&(_, n)| n)
        .map(|(name, _)| sanitise(name))
}

fn sanitise(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '_' } else { c })
        .collect()
}
