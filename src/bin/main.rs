use std::path::PathBuf;

use anyhow::Context;
use bragg_cdi::{postprocess_file, preprocess_file, Config, ScanContext};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
enum Stage {
    /// Detector frames to orthonormal reciprocal space grid
    Preprocess {
        /// NPZ archive with the `data` and optional `mask` and `frames` arrays
        input: PathBuf,
        /// Output NPZ archive, the summary is pickled next to it
        output: PathBuf,
    },
    /// Reconstructed object to displacement and strain
    Postprocess {
        /// NPZ archive with the `modulus`, `phase`, `qx`, `qz` and `qy` arrays
        input: PathBuf,
        /// Output NPZ archive, the summary is pickled next to it
        output: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(name = "bragg-cdi", about = "Bragg coherent diffraction imaging processing")]
struct Opt {
    /// YAML configuration file
    #[structopt(short, long, default_value = "config.yml")]
    config: PathBuf,
    /// Scan number, defaults to the first scan of the configuration
    #[structopt(short, long)]
    scan: Option<u32>,
    #[structopt(subcommand)]
    stage: Stage,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let config = Config::load(&opt.config)
        .with_context(|| format!("failed to load {:?}", opt.config))?;
    let (geometry, preprocessing, postprocessing) = config.validate()?;
    let scan = opt
        .scan
        .or_else(|| config.scans.first().copied())
        .unwrap_or_default();
    let ctx = ScanContext::new(config.sample.as_str(), scan);

    match opt.stage {
        Stage::Preprocess { input, output } => {
            let summary = preprocess_file(&input, &output, &geometry, &preprocessing, &ctx)
                .with_context(|| format!("{}: preprocessing of {:?} failed", ctx, input))?;
            println!("{ctx}");
            if let Some(peak) = summary.bragg_peak {
                println!(" . Bragg peak ({}): {}", summary.peak_method, peak);
            }
            if let Some(fit) = &summary.rocking_curve {
                println!(" . rocking curve FWHM: {:.4}deg", fit.fwhm);
            }
            println!(" . FFT policy: {}", summary.policy);
            println!(" . shape: {:?}", summary.shape);
            println!(" . q: {:.4?} 1/nm", summary.q_bragg);
        }
        Stage::Postprocess { input, output } => {
            let summary = postprocess_file(&input, &output, &geometry, &postprocessing, &ctx)
                .with_context(|| format!("{}: postprocessing of {:?} failed", ctx, input))?;
            println!("{ctx}");
            println!(" . planar distance: {:.5}nm", summary.planar_distance);
            println!(" . voxel size: {:.2?}nm", summary.voxel_size);
            println!(" . crystal volume: {:.0}nm3", summary.crystal_volume);
        }
    }

    Ok(())
}
