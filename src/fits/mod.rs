// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Helper fits functions.
 */

pub mod error;

pub use error::FitsError;

use std::path::{Path, PathBuf};

use fitsio::{errors::check_status as fits_check_status, hdu::HduInfo, FitsFile};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

lazy_static! {
    static ref RE_SPLIT_GTI: Regex = Regex::new(r"^good_(?P<row>\d+)\.gti$").unwrap();
}

/// The number of rows in a table HDU.
fn table_rows(fits: &mut FitsFile, file: &Path, hdu_num: usize) -> Result<usize, FitsError> {
    let hdu = fits.hdu(hdu_num)?;
    match hdu.info {
        HduInfo::TableInfo { num_rows, .. } => Ok(num_rows),
        _ => Err(FitsError::NotATable {
            file: file.to_path_buf(),
            hdu: hdu_num,
        }),
    }
}

/// Delete `count` rows starting at (1-indexed) `first` from the current HDU.
fn delete_rows(fits: &mut FitsFile, first: usize, count: usize) -> Result<(), FitsError> {
    if count == 0 {
        return Ok(());
    }
    let mut status = 0;
    // rust-fitsio doesn't expose row deletion, so call cfitsio directly.
    unsafe {
        fitsio_sys::ffdrow(
            fits.as_raw(), /* I - FITS file pointer            */
            first as i64,  /* I - first row to delete (1 = 1st) */
            count as i64,  /* I - number of rows to delete      */
            &mut status,   /* IO - error status                 */
        );
    }
    fits_check_status(status)?;
    Ok(())
}

/// The previously-split GTI files in `dir`, ordered by row.
fn existing_split_gtis(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut found: Vec<(usize, PathBuf)> = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let row = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| RE_SPLIT_GTI.captures(n))
            .and_then(|c| c["row"].parse().ok());
        if let Some(row) = row {
            found.push((row, path));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

/// The GTI row number encoded in a split GTI file name (`good_<n>.gti`).
pub fn split_gti_row(gti: &Path) -> Option<usize> {
    let name = gti.file_name()?.to_str()?;
    RE_SPLIT_GTI.captures(name)?["row"].parse().ok()
}

/// Split a multi-row GTI file into one file per row, named `good_<n>.gti`
/// (1-indexed) inside `out_dir`. Each output keeps the primary HDU and the
/// GTI header of the input; only the rows differ.
///
/// If `out_dir` already holds as many split files as there are rows, those
/// are returned without doing any work.
pub fn split_gti(gti: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, FitsError> {
    if !gti.exists() {
        return Err(FitsError::NotFound(gti.to_path_buf()));
    }
    let num_rows = {
        let mut f = FitsFile::open(gti)?;
        table_rows(&mut f, gti, 1)?
    };

    std::fs::create_dir_all(out_dir)?;
    let existing = existing_split_gtis(out_dir)?;
    if existing.len() == num_rows {
        debug!("{} already split into {} files", gti.display(), num_rows);
        return Ok(existing);
    }

    info!("Splitting {} into {} GTI files", gti.display(), num_rows);
    let mut out = Vec::with_capacity(num_rows);
    for row in 1..=num_rows {
        let out_path = out_dir.join(format!("good_{}.gti", row));
        std::fs::copy(gti, &out_path)?;
        let mut f = FitsFile::edit(&out_path)?;
        // Make the GTI table the current HDU.
        f.hdu(1)?;
        // Rows after this one first, so that `row` stays valid.
        delete_rows(&mut f, row + 1, num_rows - row)?;
        delete_rows(&mut f, 1, row - 1)?;
        out.push(out_path);
    }
    Ok(out)
}

/// Read DATAMODE and DDESC out of the `extension` HDU of an RXTE data file.
/// Returns `None` if the file can't be read, the extension isn't there, or
/// there is no DATAMODE. gzip-compressed files are handled by cfitsio.
pub fn read_xenon_header(file: &Path, extension: &str) -> Option<(String, String)> {
    let mut f = match FitsFile::open(file) {
        Ok(f) => f,
        Err(e) => {
            debug!("Couldn't open {}: {}", file.display(), e);
            return None;
        }
    };
    let hdu = f.hdu(extension).ok()?;
    let data_mode: String = hdu.read_key(&mut f, "DATAMODE").ok()?;
    let ddesc: String = hdu
        .read_key(&mut f, "DDESC")
        .unwrap_or_else(|_| "N/A".to_string());
    Some((data_mode, ddesc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsio::tables::{ColumnDataType, ColumnDescription};

    fn make_gti(path: &Path, starts: &[f64], stops: &[f64]) {
        let mut f = FitsFile::create(path).open().unwrap();
        let cols = [
            ColumnDescription::new("START")
                .with_type(ColumnDataType::Double)
                .create()
                .unwrap(),
            ColumnDescription::new("STOP")
                .with_type(ColumnDataType::Double)
                .create()
                .unwrap(),
        ];
        let hdu = f.create_table("STDGTI".to_string(), &cols).unwrap();
        hdu.write_col(&mut f, "START", starts).unwrap();
        hdu.write_col(&mut f, "STOP", stops).unwrap();
        hdu.write_key(&mut f, "TIMESYS", "TT").unwrap();
    }

    #[test]
    fn test_split_gti() {
        let dir = tempfile::tempdir().unwrap();
        let gti = dir.path().join("good.gti");
        make_gti(&gti, &[10.0, 20.0, 30.0], &[15.0, 25.0, 35.0]);

        let sep = dir.path().join("sep_gtis");
        let files = split_gti(&gti, &sep).unwrap();
        assert_eq!(files.len(), 3);

        for (i, file) in files.iter().enumerate() {
            assert_eq!(split_gti_row(file), Some(i + 1));
            let mut f = FitsFile::open(file).unwrap();
            let hdu = f.hdu(1).unwrap();
            let start: Vec<f64> = hdu.read_col(&mut f, "START").unwrap();
            let stop: Vec<f64> = hdu.read_col(&mut f, "STOP").unwrap();
            assert_eq!(start, vec![10.0 * (i + 1) as f64]);
            assert_eq!(stop, vec![10.0 * (i + 1) as f64 + 5.0]);
            // The header came along too.
            let timesys: String = hdu.read_key(&mut f, "TIMESYS").unwrap();
            assert_eq!(timesys, "TT");
        }

        // A second call reuses the existing files.
        let modified = std::fs::metadata(&files[0]).unwrap().modified().unwrap();
        let again = split_gti(&gti, &sep).unwrap();
        assert_eq!(again, files);
        assert_eq!(
            std::fs::metadata(&again[0]).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn test_split_gti_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = split_gti(&dir.path().join("nope.gti"), dir.path());
        assert!(matches!(result, Err(FitsError::NotFound(_))));
    }

    #[test]
    fn test_read_xenon_header() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("FS4f_1234");
        {
            let mut f = FitsFile::create(&file).open().unwrap();
            let cols = [ColumnDescription::new("TIME")
                .with_type(ColumnDataType::Double)
                .create()
                .unwrap()];
            let hdu = f.create_table("XTE_SP".to_string(), &cols).unwrap();
            hdu.write_key(&mut f, "DATAMODE", "GoodXenon1_2s").unwrap();
            hdu.write_key(&mut f, "DDESC", "PCU0-4").unwrap();
        }

        assert_eq!(
            read_xenon_header(&file, "XTE_SP"),
            Some(("GoodXenon1_2s".to_string(), "PCU0-4".to_string()))
        );
        assert_eq!(read_xenon_header(&file, "XTE_SE"), None);
        assert_eq!(read_xenon_header(&dir.path().join("missing"), "XTE_SP"), None);
    }

    #[test]
    fn test_split_gti_row() {
        assert_eq!(split_gti_row(Path::new("/a/sep_gtis/good_12.gti")), Some(12));
        assert_eq!(split_gti_row(Path::new("/a/Analysis/good.gti")), None);
    }
}
