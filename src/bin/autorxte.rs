// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure};
use log::info;
use structopt::StructOpt;

use autorxte::config::{Config, EnergyRange, Workers};
use autorxte::download::{self, heasarc, region, DownloadRequest, Filters, ReqwestClient, Selection};
use autorxte::prompt::Prompter;
use autorxte::stages::color::{bands, ColorExtractParams, ColorPlotParams};
use autorxte::stages::extract::Token;
use autorxte::stages::lightcurve::LightcurveType;
use autorxte::stages::plot::PlotParams;
use autorxte::stages::xenon::XenonParams;
use autorxte::stages::xspec::{parse_band, resolve_model, FitParams};
use autorxte::stages::*;

/// Run HEASoft over RXTE PCA observations
#[derive(StructOpt, Debug)]
#[structopt(name = "autorxte")]
struct Opts {
    /// A YAML config file. Without one, ./autorxte_config.yaml and then
    /// ~/.autorxte/config.yaml are tried.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Print more. -v for debug messages, -vv for everything.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt, Debug)]
struct Root {
    /// The directory containing the observation directories.
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    directory: PathBuf,
}

impl Root {
    /// The directory, made absolute. Some tools run from inside Analysis
    /// directories, so paths in their scripts can't be relative.
    fn path(&self) -> Result<PathBuf, anyhow::Error> {
        ensure!(
            self.directory.is_dir(),
            "Directory {} does not exist",
            self.directory.display()
        );
        Ok(self.directory.canonicalize()?)
    }
}

#[derive(StructOpt, Debug)]
struct Parallel {
    /// How many tools to run at once: a number, or "auto" for one per CPU.
    #[structopt(short, long)]
    workers: Option<Workers>,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Search the HEASARC archive for a source and download its observations
    Download(DownloadArgs),

    /// Run pcaprepobsid on every observation
    Prepare {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// Re-run observations that already have a results directory.
        #[structopt(long)]
        no_skip_existing: bool,
    },

    /// Put each observation's fits_files.god into its results' Analysis directory
    Organize {
        #[structopt(flatten)]
        root: Root,
        /// Copy the god files rather than moving them.
        #[structopt(long)]
        copy: bool,
        #[structopt(long)]
        overwrite: bool,
    },

    /// Copy a bitmask file into every Analysis directory
    Bitmask {
        #[structopt(flatten)]
        root: Root,
        #[structopt(short, long, parse(from_os_str))]
        bitmask: PathBuf,
        #[structopt(long)]
        overwrite: bool,
    },

    /// Make good time intervals with maketime
    Filter {
        #[structopt(flatten)]
        root: Root,
        /// The maketime selection expression.
        #[structopt(short, long)]
        expression: Option<String>,
    },

    /// Extract event lightcurves with seextrct
    Extract {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// "e" for event mode, "xenon" for make_se output.
        #[structopt(short, long)]
        token: Option<Token>,
        #[structopt(short, long)]
        bitmask: Option<String>,
        #[structopt(long)]
        prefix: Option<String>,
        /// Extract each good time interval separately.
        #[structopt(long)]
        split_gti: bool,
        /// [seconds]
        #[structopt(long)]
        time_bin: Option<f64>,
    },

    /// Make Standard-1 or Standard-2 lightcurves
    Lightcurves {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// "std1" or "std2".
        #[structopt(long = "type")]
        kind: Option<LightcurveType>,
        /// The lightcurve file name.
        #[structopt(short, long)]
        output: Option<String>,
    },

    /// Make source and background spectra with pcaextspect2
    Spectra {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
    },

    /// Make power density spectra
    Pds {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// The lightcurve in each Analysis directory to use.
        #[structopt(short, long)]
        lightcurve: Option<String>,
    },

    /// Extract lightcurves in several channel ranges
    ColorExtract {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// Colour names, comma separated.
        #[structopt(long, use_delimiter = true)]
        names: Vec<String>,
        /// Channel ranges, comma separated, one per name.
        #[structopt(long, use_delimiter = true)]
        ranges: Vec<String>,
        #[structopt(short, long)]
        token: Option<Token>,
        #[structopt(short, long)]
        bitmask: Option<String>,
        #[structopt(long)]
        time_bin: Option<f64>,
    },

    /// Plot colour-colour diagrams
    ColorPlot {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        #[structopt(long, use_delimiter = true)]
        names: Vec<String>,
        #[structopt(long)]
        bin_size: Option<String>,
        #[structopt(long)]
        format: Option<String>,
    },

    /// Fit every spectrum with XSPEC and tabulate the results
    Xspec {
        #[structopt(flatten)]
        root: Root,
        /// A model name, or an XSPEC model expression.
        #[structopt(short, long)]
        model: Option<String>,
        /// Lower energy bound [keV].
        #[structopt(long)]
        emin: Option<f64>,
        /// Upper energy bound [keV].
        #[structopt(long)]
        emax: Option<f64>,
        /// Also compute the flux in these bands, e.g. --flux 2-10 --flux 10-20.
        #[structopt(long)]
        flux: Vec<String>,
        #[structopt(long)]
        no_plots: bool,
        /// The results table. Defaults to xspec_results.csv in the directory.
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// The whole Xenon-mode workflow
    Xenon {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// The FITS extension holding DATAMODE.
        #[structopt(long)]
        extension: Option<String>,
        /// Only make and move the god files.
        #[structopt(long)]
        skip_make_se: bool,
    },

    /// List each observation's Xenon files in xenon_files.god
    XenonGod {
        #[structopt(flatten)]
        root: Root,
        #[structopt(long)]
        extension: Option<String>,
    },

    /// Move xenon_files.god into the Analysis directories
    XenonMove {
        #[structopt(flatten)]
        root: Root,
    },

    /// Run make_se wherever there is a xenon_files.god
    MakeSe {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        #[structopt(long)]
        output_root: Option<String>,
    },

    /// List the make_se output in xenon_event_files.txt
    XenonLists {
        #[structopt(flatten)]
        root: Root,
        #[structopt(long)]
        pattern: Option<String>,
    },

    /// Plot every lightcurve
    Plot {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// Which files to plot, e.g. "*.lc".
        #[structopt(long)]
        pattern: Option<String>,
        #[structopt(long)]
        bin_size: Option<String>,
        #[structopt(long)]
        format: Option<String>,
    },

    /// Plot several lightcurves from one directory together
    PlotMulti {
        #[structopt(parse(from_os_str), required = true)]
        files: Vec<PathBuf>,
        /// The plot's name, without extension.
        #[structopt(short, long, default_value = "comparison")]
        output: String,
        #[structopt(long, default_value = "-1")]
        bin_size: String,
        #[structopt(long)]
        format: Option<String>,
    },

    /// prepare, organize, bitmask, filter, extract, lightcurves, spectra, pds
    Pipeline {
        #[structopt(flatten)]
        root: Root,
        #[structopt(flatten)]
        par: Parallel,
        /// Copy this bitmask in before filtering.
        #[structopt(short, long, parse(from_os_str))]
        bitmask: Option<PathBuf>,
    },
}

#[derive(StructOpt, Debug)]
struct DownloadArgs {
    /// A source name, or "ra dec" in degrees.
    #[structopt(short, long)]
    source: Option<String>,

    #[structopt(long)]
    catalog: Option<String>,

    /// Search radius [arcmin].
    #[structopt(long)]
    radius: Option<f64>,

    /// Where the download directory is made.
    #[structopt(short, long, default_value = ".", parse(from_os_str))]
    directory: PathBuf,

    /// Minimum exposure [seconds].
    #[structopt(long)]
    min_exposure: Option<f64>,

    /// YYYY-MM-DD
    #[structopt(long)]
    start_date: Option<String>,

    /// YYYY-MM-DD
    #[structopt(long)]
    end_date: Option<String>,

    /// Download the N longest observations.
    #[structopt(long)]
    top_n: Option<usize>,

    /// Download the N shortest observations.
    #[structopt(long)]
    bottom_n: Option<usize>,

    /// Download these ObsIDs, comma separated.
    #[structopt(long, use_delimiter = true)]
    obsids: Vec<String>,

    /// Download files again even if they were downloaded before.
    #[structopt(long)]
    overwrite: bool,

    #[structopt(long)]
    bucket: Option<String>,

    /// The S3 region, e.g. us-east-1.
    #[structopt(long)]
    region: Option<String>,

    /// Find the region that answers fastest.
    #[structopt(long)]
    auto_detect_region: bool,

    /// Remember the region for next time.
    #[structopt(long)]
    save_region: bool,

    /// Ask about anything not given on the command line.
    #[structopt(short, long)]
    interactive: bool,

    /// HTTP timeout [seconds].
    #[structopt(long, default_value = "300")]
    timeout: u64,
}

/// The env_logger filter for the given verbosity and configured level.
fn log_filter(verbose: u8, config_level: &str) -> String {
    match verbose {
        0 => match config_level.trim().to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            l => l.to_string(),
        },
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn main() -> Result<(), anyhow::Error> {
    let opts = Opts::from_args();
    let config = Config::load(opts.config.as_deref())?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(opts.verbose, &config.global.log_level)),
    )
    .init();

    let run = |workers: &Parallel, section: Workers| RunOptions {
        workers: config.workers(workers.workers, section),
        keep_scripts: !config.global.cleanup_temp_files,
    };
    let sequential = RunOptions {
        workers: 1,
        keep_scripts: !config.global.cleanup_temp_files,
    };

    let report = match opts.cmd {
        Command::Download(args) => {
            run_download(args, &config)?;
            return Ok(());
        }

        Command::Prepare {
            root,
            par,
            no_skip_existing,
        } => prepare::prepare_observations(
            &root.path()?,
            config.preparation.skip_existing && !no_skip_existing,
            &run(&par, config.preparation.workers),
        )?,

        Command::Organize { root, copy, overwrite } => {
            let n = organize::organize_fits_files(
                &root.path()?,
                config.organization.move_mode && !copy,
                config.organization.overwrite || overwrite,
            )?;
            info!("Organised {} observations", n);
            return Ok(());
        }

        Command::Bitmask {
            root,
            bitmask,
            overwrite,
        } => {
            let n = bitmask::copy_bitmask(&root.path()?, &bitmask, config.bitmasks.overwrite || overwrite)?;
            info!("Copied {} to {} Analysis directories", bitmask.display(), n);
            return Ok(());
        }

        Command::Filter { root, expression } => filter::create_gti_filters(
            &root.path()?,
            expression.as_deref().unwrap_or(&config.filtering.filter_expression),
            &sequential,
        )?,

        Command::Extract {
            root,
            par,
            token,
            bitmask,
            prefix,
            split_gti,
            time_bin,
        } => {
            let mut params = pipeline::extract_params(&config)?;
            if let Some(t) = token {
                params.token = t;
            }
            if let Some(b) = bitmask {
                params.bitmask = b;
            }
            if let Some(p) = prefix {
                params.prefix = p;
            }
            params.split_gti |= split_gti;
            if let Some(t) = time_bin {
                params.time_bin = t;
            }
            extract::extract_all_events(&root.path()?, &params, &run(&par, config.extraction.workers))?
        }

        Command::Lightcurves { root, par, kind, output } => {
            let kind = match kind {
                Some(k) => k,
                None => config.lightcurves.kind.parse()?,
            };
            let (lc_kind, name) = pipeline::lightcurve_kind(&config, kind);
            lightcurve::generate_lightcurves(
                &root.path()?,
                &lc_kind,
                output.as_deref().unwrap_or(&name),
                &run(&par, config.lightcurves.workers),
            )?
        }

        Command::Spectra { root, par } => spectra::extract_spectra(
            &root.path()?,
            &pipeline::spectra_params(&config),
            &run(&par, config.spectra.workers),
        )?,

        Command::Pds { root, par, lightcurve } => {
            let mut params = pipeline::pds_params(&config);
            if let Some(lc) = lightcurve {
                params.lightcurve = lc;
            }
            pds::compute_pds(&root.path()?, &params, &run(&par, config.pds.workers))?
        }

        Command::ColorExtract {
            root,
            par,
            names,
            ranges,
            token,
            bitmask,
            time_bin,
        } => {
            let c = &config.color_analysis;
            let names = if names.is_empty() { c.color_names.clone() } else { names };
            let ranges = if ranges.is_empty() {
                c.ranges_for(&names)
                    .into_iter()
                    .zip(&names)
                    .map(|(r, n)| r.ok_or_else(|| anyhow!("No channel range configured for colour '{}'", n)))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                ranges
            };
            let params = ColorExtractParams {
                token: match token {
                    Some(t) => t,
                    None => config.extraction.token.parse()?,
                },
                bitmask: bitmask.unwrap_or_else(|| config.extraction.bitmask.clone()),
                bands: bands(&names, &ranges)?,
                time_bin: time_bin.unwrap_or(c.time_bin),
            };
            color::extract_color_ranges(&root.path()?, &params, &run(&par, c.workers))?
        }

        Command::ColorPlot {
            root,
            par,
            names,
            bin_size,
            format,
        } => {
            let c = &config.color_analysis;
            let params = ColorPlotParams {
                names: if names.is_empty() { c.color_names.clone() } else { names },
                bin_size: bin_size.unwrap_or_else(|| c.lcurve_bin_size.clone()),
                max_bins: c.max_bins,
                format: format.unwrap_or_else(|| c.plot_format.clone()),
            };
            color::plot_color_diagrams(&root.path()?, &params, &run(&par, c.workers))?
        }

        Command::Xspec {
            root,
            model,
            emin,
            emax,
            flux,
            no_plots,
            output,
        } => {
            let x = &config.xspec;
            let root = root.path()?;
            let energy_range = EnergyRange {
                min: emin.unwrap_or(x.energy_range.min),
                max: emax.unwrap_or(x.energy_range.max),
            };
            ensure!(
                energy_range.min < energy_range.max,
                "The energy range {}-{} keV is empty",
                energy_range.min,
                energy_range.max
            );
            let params = FitParams {
                model: resolve_model(model.as_deref().unwrap_or(&x.default_model), &x.models),
                energy_range,
                max_iterations: x.max_iterations,
                plot_format: if x.save_plots && !no_plots {
                    Some(x.plot_format.clone())
                } else {
                    None
                },
                flux_bands: flux.iter().map(|b| parse_band(b)).collect::<Result<Vec<_>, _>>()?,
            };
            let output = output.unwrap_or_else(|| root.join("xspec_results.csv"));
            xspec::fit_all_spectra(&root, &params, &output, &sequential)?
        }

        Command::Xenon {
            root,
            par,
            extension,
            skip_make_se,
        } => {
            let x = &config.xenon;
            let params = XenonParams {
                extension: extension.unwrap_or_else(|| x.fits_extension.clone()),
                output_root: x.output_root.clone(),
                event_pattern: x.event_pattern.clone(),
                run_make_se: !skip_make_se,
            };
            xenon::xenon_complete_workflow(&root.path()?, &params, &run(&par, x.workers))?
        }

        Command::XenonGod { root, extension } => {
            let ext = extension.unwrap_or_else(|| config.xenon.fits_extension.clone());
            let n = xenon::create_xenon_god_files(&root.path()?, &ext)?;
            info!("Wrote {} god files", n);
            return Ok(());
        }

        Command::XenonMove { root } => {
            let n = xenon::move_xenon_god_files(&root.path()?)?;
            info!("Moved {} god files", n);
            return Ok(());
        }

        Command::MakeSe { root, par, output_root } => xenon::run_make_se(
            &root.path()?,
            output_root.as_deref().unwrap_or(&config.xenon.output_root),
            &run(&par, config.xenon.workers),
        )?,

        Command::XenonLists { root, pattern } => {
            let n = xenon::create_xenon_event_lists(
                &root.path()?,
                pattern.as_deref().unwrap_or(&config.xenon.event_pattern),
            )?;
            info!("Wrote {} event lists", n);
            return Ok(());
        }

        Command::Plot {
            root,
            par,
            pattern,
            bin_size,
            format,
        } => {
            let p = &config.plotting;
            let params = PlotParams {
                bin_size: bin_size.unwrap_or_else(|| p.bin_size.clone()),
                max_bins: p.max_bins,
                format: format.unwrap_or_else(|| p.format.clone()),
            };
            plot::plot_all_lightcurves(
                &root.path()?,
                pattern.as_deref().unwrap_or(&p.pattern),
                &params,
                &run(&par, p.workers),
            )?
        }

        Command::PlotMulti {
            files,
            output,
            bin_size,
            format,
        } => {
            let format = format.unwrap_or_else(|| config.plotting.format.clone());
            plot::plot_multiple_lightcurves(&files, &output, &bin_size, &format, &sequential)?;
            return Ok(());
        }

        Command::Pipeline { root, par, bitmask } => {
            pipeline::run_pipeline(&root.path()?, &config, bitmask.as_deref(), par.workers)?
        }
    };

    info!("Finished: {}", report);
    Ok(())
}

fn run_download(args: DownloadArgs, config: &Config) -> Result<(), anyhow::Error> {
    let client = ReqwestClient::new(Duration::from_secs(args.timeout))?;
    let bucket = args.bucket.unwrap_or_else(|| config.download.s3.bucket.clone());
    let region_file = region::default_region_file();
    let mut prompter = Prompter::stdio();

    let region = if let Some(r) = args.region {
        r
    } else if args.auto_detect_region {
        region::find_fastest_region(&client, &bucket, &region::REGIONS)
    } else if args.interactive {
        download::prompt_region(&mut prompter, &client, &bucket, region_file.as_deref())?
    } else {
        region_file
            .as_deref()
            .and_then(region::load_preferred_region)
            .unwrap_or_else(|| config.download.s3.region.clone())
    };
    if args.save_region {
        match &region_file {
            Some(f) => region::save_preferred_region(f, &region)?,
            None => bail!("Couldn't find a home directory to save the region in"),
        }
    }
    info!("Using region {}", region);

    let source = match args.source {
        Some(s) => s,
        None if args.interactive => prompter.input("Source name or coordinates", None)?,
        None => bail!("No source given; use --source, or --interactive to be asked"),
    };
    ensure!(!source.trim().is_empty(), "No source given");

    let filters = Filters {
        min_exposure: args.min_exposure,
        start: args.start_date.as_deref().map(heasarc::parse_date).transpose()?,
        end: args.end_date.as_deref().map(heasarc::parse_date).transpose()?,
    };
    let obsids = if args.obsids.is_empty() { None } else { Some(args.obsids) };
    let req = DownloadRequest {
        source,
        catalog: args.catalog.unwrap_or_else(|| config.download.catalog.clone()),
        radius_arcmin: args.radius.unwrap_or(config.download.radius_arcmin),
        output_dir: args.directory,
        filters,
        selection: Selection::from_options(obsids, args.top_n, args.bottom_n),
        overwrite: if args.overwrite { Some(true) } else { None },
        bucket,
        region,
    };

    let summary = if args.interactive {
        download::search_and_download_interactive(&client, &req, &mut prompter)?
    } else {
        download::search_and_download(&client, &req)?
    };
    info!(
        "{}: {} observations ({}) in {}",
        summary.source_name,
        summary.report,
        download::s3::human_readable_size(summary.bytes as f64),
        summary.download_dir.display()
    );
    Ok(())
}
