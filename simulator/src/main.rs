use anyhow::Context;
use beamcore::settings::{Algorithm, ApodizationScheme};
use clap::Parser;
use log::info;
use std::fs;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Offline beamforming workflow driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 128)]
    elements: usize,
    /// DAS, DMAS or SCDMAS; overrides the workflow file when given
    #[arg(long)]
    algorithm: Option<Algorithm>,
    /// Hann, Hamming or Box; unknown names fall back to Box
    #[arg(long)]
    apodization: Option<String>,
    /// Try the wgpu backend, falling back to the CPU on failure
    #[arg(long, default_value_t = false)]
    gpu: bool,
    #[arg(long, default_value_t = false)]
    envelope: bool,
    /// Where to write the JSON run report
    #[arg(long, default_value = "tools/data/beamforming_report.json")]
    report: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(
            args.elements,
            Algorithm::DelayAndSum,
            ApodizationScheme::Hann,
            false,
        )
    };
    if let Some(algorithm) = args.algorithm {
        workflow_config.settings.algorithm = algorithm;
    }
    if let Some(tag) = &args.apodization {
        workflow_config.settings.apodization = ApodizationScheme::from_tag(tag);
    }
    workflow_config.settings.use_gpu |= args.gpu;
    workflow_config.settings.envelope_detection |= args.envelope;
    workflow_config.validate()?;

    let runner = Runner::new(workflow_config);
    let result = runner.run_generated()?;

    println!(
        "Reconstructed {}x{} on {:?} -> peak {:.4} at line {} depth {:.2} mm, rms {:.4}",
        result.output.lines,
        result.output.samples_per_line,
        result.backend,
        result.peak_value,
        result.peak_line,
        result.peak_position_m[1] * 1e3,
        result.rms
    );
    if let Some(message) = &result.message {
        println!("Diagnostic: {}", message);
    }

    if let Some(parent) = args.report.parent() {
        fs::create_dir_all(parent)?;
    }
    let report = serde_json::to_string_pretty(&result).context("serialising run report")?;
    fs::write(&args.report, report)
        .with_context(|| format!("writing report {}", args.report.display()))?;
    info!("report written to {}", args.report.display());

    Ok(())
}
