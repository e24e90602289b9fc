use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bragg_cdi::{postprocess_file, preprocess_file, Config, ScanContext};
use glob::glob;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "bragg-cdi-batch", about = "Parallel processing of Bragg CDI scans")]
struct Opt {
    /// Processing stage: preprocess or postprocess
    stage: String,
    /// Glob pattern of the input NPZ archives, the scan number is the last
    /// group of digits of the file name
    pattern: String,
    /// YAML configuration file
    #[structopt(short, long, default_value = "config.yml")]
    config: PathBuf,
    /// Output directory
    #[structopt(short, long, default_value = ".")]
    output: PathBuf,
}

#[derive(Debug, Serialize)]
struct ScanOutcome {
    scan: u32,
    input: String,
    output: String,
    error: Option<String>,
}

/// Last group of digits of the file stem
fn scan_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.chars().rev().collect::<String>().parse().ok()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let config = Config::load(&opt.config)
        .with_context(|| format!("failed to load {:?}", opt.config))?;
    let (geometry, preprocessing, postprocessing) = config.validate()?;
    let preprocess = match opt.stage.as_str() {
        "preprocess" => true,
        "postprocess" => false,
        stage => anyhow::bail!("unknown stage {stage}, expected preprocess or postprocess"),
    };

    let inputs: Vec<(u32, PathBuf)> = glob(&opt.pattern)?
        .filter_map(|entry| entry.ok())
        .filter_map(|path| scan_number(&path).map(|scan| (scan, path)))
        .filter(|(scan, _)| config.scans.is_empty() || config.scans.contains(scan))
        .collect();
    let n_scan = inputs.len();
    println!("Found {} scans", n_scan);
    std::fs::create_dir_all(&opt.output)?;

    let pb = ProgressBar::new(n_scan as u64);
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos:>4}/{len:4} scans {elapsed_precise}",
    )?);
    let outcomes: Vec<ScanOutcome> = inputs
        .into_par_iter()
        .progress_with(pb)
        .map(|(scan, input)| {
            let ctx = ScanContext::new(config.sample.as_str(), scan);
            let output = opt.output.join(format!("{}_{}.npz", ctx, opt.stage));
            let result = if preprocess {
                preprocess_file(&input, &output, &geometry, &preprocessing, &ctx).map(|_| ())
            } else {
                postprocess_file(&input, &output, &geometry, &postprocessing, &ctx).map(|_| ())
            };
            let error = result.err().map(|e| {
                let e = anyhow::Error::from(e);
                log::error!("[{}] {:#}", ctx, e);
                format!("{:#}", e)
            });
            ScanOutcome {
                scan,
                input: input.display().to_string(),
                output: output.display().to_string(),
                error,
            }
        })
        .collect();

    let failures: Vec<_> = outcomes.iter().filter(|o| o.error.is_some()).collect();
    println!(
        "{} scans processed, {} failed",
        outcomes.len() - failures.len(),
        failures.len()
    );
    for outcome in &failures {
        println!(
            " . S{}: {}",
            outcome.scan,
            outcome.error.as_deref().unwrap_or_default()
        );
    }
    let mut file = File::create(opt.output.join(format!("{}_batch.pkl", opt.stage)))?;
    serde_pickle::to_writer(&mut file, &outcomes, Default::default())?;
    Ok(())
}
