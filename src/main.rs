use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use jatkuu::slurm::job_config::JobConfig;
use jatkuu::status::read_job_ids;

/// Submit resumable, self-resubmitting batch jobs to SLURM.
#[derive(Parser)]
#[command(name = "jatkuu", version)]
struct Cli {
    /// Path to the YAML job description
    #[arg(long)]
    job: PathBuf,

    /// YAML config file resolved against {...} placeholders in job_dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run as a blocking interactive session instead of a batch job
    #[arg(long)]
    interactive: bool,

    /// Create the job directory without submitting it
    #[arg(long)]
    no_submit: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!("jatkuu {} starting up", jatkuu::VERSION);

    let text = fs::read_to_string(&cli.job)
        .with_context(|| format!("can't read job description {}", cli.job.display()))?;
    let mut job: JobConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("can't parse job description {}", cli.job.display()))?;

    if let Some(config_path) = &cli.config {
        let config_text = fs::read_to_string(config_path)
            .with_context(|| format!("can't read config {}", config_path.display()))?;
        let config: serde_yaml::Value = serde_yaml::from_str(&config_text)
            .with_context(|| format!("can't parse config {}", config_path.display()))?;
        job.config = Some(serde_json::to_value(config)?);
    }
    if cli.interactive {
        job.interactive = true;
    }
    if cli.no_submit {
        job.submit = false;
    }

    let job_dir = job.submit()?;
    println!("{}", job_dir.path.display());
    if let Some(job_id) = read_job_ids(&job_dir.path)?.last() {
        println!("Submitted batch job {job_id}");
    }

    Ok(())
}
