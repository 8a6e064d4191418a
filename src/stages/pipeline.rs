// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * The standard reduction, start to finish, with parameters from the config.
 */

use std::path::Path;

use log::info;

use super::extract::{ExtractParams, Token};
use super::lightcurve::{LightcurveKind, LightcurveType};
use super::pds::PdsParams;
use super::spectra::SpectraParams;
use super::*;
use crate::config::{Config, Workers};

pub fn extract_params(c: &Config) -> Result<ExtractParams, StageError> {
    Ok(ExtractParams {
        token: c.extraction.token.parse::<Token>()?,
        bitmask: c.extraction.bitmask.clone(),
        prefix: c.extraction.prefix.clone(),
        split_gti: c.extraction.split_gti,
        time_bin: c.extraction.time_bin,
    })
}

/// The lightcurve flavour and its output file name.
pub fn lightcurve_kind(c: &Config, kind: LightcurveType) -> (LightcurveKind, String) {
    match kind {
        LightcurveType::Std1 => (
            LightcurveKind::Std1 {
                pcu: c.lightcurves.std1.pcu_selection.clone(),
                bin_size: c.lightcurves.std1.bin_size_sec,
            },
            c.lightcurves.std1.output_name.clone(),
        ),
        LightcurveType::Std2 => (
            LightcurveKind::Std2 {
                pcu: c.lightcurves.std2.pcu_selection.clone(),
                channels: c.lightcurves.std2.energy_channels.clone(),
                time_bins: c.lightcurves.std2.time_bins,
            },
            c.lightcurves.std2.output_name.clone(),
        ),
    }
}

pub fn spectra_params(c: &Config) -> SpectraParams {
    SpectraParams {
        pcu: c.spectra.pcu_selection.clone(),
        channels: c.spectra.energy_channels.clone(),
        source_file: c.spectra.source_file.clone(),
        background_file: c.spectra.background_file.clone(),
        response_file: c.spectra.response_file.clone(),
    }
}

pub fn pds_params(c: &Config) -> PdsParams {
    PdsParams {
        lightcurve: c.pds.input_lightcurve.clone(),
        binning: c.pds.binning.clone(),
        rebin: c.pds.rebin.clone(),
        max_bins: c.pds.max_bins,
        window: c.pds.window.clone(),
        norm: c.pds.norm,
        output_png: c.pds.output_png.clone(),
    }
}

/// prepare → organize → bitmask (if one is given) → filter → extract →
/// lightcurves → spectra → PDS. A stage that can't start stops the pipeline;
/// failed tasks within a stage don't.
pub fn run_pipeline(
    root: &Path,
    config: &Config,
    bitmask_file: Option<&Path>,
    workers: Option<Workers>,
) -> Result<TaskReport, StageError> {
    let opts = |section: Workers| RunOptions {
        workers: config.workers(workers, section),
        keep_scripts: !config.global.cleanup_temp_files,
    };
    // Check everything up front rather than failing half way through.
    let kind: LightcurveType = config.lightcurves.kind.parse()?;
    let extract = extract_params(config)?;
    let (lc_kind, lc_name) = lightcurve_kind(config, kind);

    let mut total = TaskReport::default();

    info!("== Preparing observations");
    total = total.merge(prepare::prepare_observations(
        root,
        config.preparation.skip_existing,
        &opts(config.preparation.workers),
    )?);

    info!("== Organising files");
    organize::organize_fits_files(root, config.organization.move_mode, config.organization.overwrite)?;

    if let Some(b) = bitmask_file {
        info!("== Copying bitmask");
        bitmask::copy_bitmask(root, b, config.bitmasks.overwrite)?;
    }

    info!("== Filtering");
    total = total.merge(filter::create_gti_filters(
        root,
        &config.filtering.filter_expression,
        &opts(Workers::Fixed(1)),
    )?);

    info!("== Extracting events");
    total = total.merge(extract::extract_all_events(root, &extract, &opts(config.extraction.workers))?);

    info!("== Making lightcurves");
    total = total.merge(lightcurve::generate_lightcurves(
        root,
        &lc_kind,
        &lc_name,
        &opts(config.lightcurves.workers),
    )?);

    info!("== Extracting spectra");
    total = total.merge(spectra::extract_spectra(
        root,
        &spectra_params(config),
        &opts(config.spectra.workers),
    )?);

    info!("== Making power spectra");
    total = total.merge(pds::compute_pds(root, &pds_params(config), &opts(config.pds.workers))?);

    info!("Pipeline complete: {}", total);
    Ok(total)
}
