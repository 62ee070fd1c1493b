use std::process::Command;

use anyhow::{bail, Context, Result};
use log::info;

use crate::slurm::job_config::JobConfig;
use crate::status::append_job_id;
use crate::JobDir;

impl JobConfig {
    /// Creates the job directory and, unless `submit: false`, dispatches it.
    ///
    /// Returns the job directory; the first submission id (batch mode) is
    /// recorded in the ledger.
    pub fn submit(&self) -> Result<JobDir> {
        let job_dir = self.create()?;
        if self.submit {
            submit_job_dir(&job_dir, self.interactive)?;
        }
        Ok(job_dir)
    }
}

/// Submits an already-created job directory to the scheduler.
///
/// Batch mode enqueues `job.sh` via sbatch, appends the acknowledged
/// submission id to the ledger, and returns it. Interactive mode blocks in
/// an srun session initialized from `job_interactive.sh` and makes no
/// ledger entry. Either way the job directory stays on disk, so a failed
/// dispatch can be retried manually.
pub fn submit_job_dir(job_dir: &JobDir, interactive: bool) -> Result<Option<u64>> {
    if interactive {
        run_srun(job_dir)?;
        Ok(None)
    } else {
        let job_id = run_sbatch(job_dir)?;
        append_job_id(&job_dir.path, job_id)?;
        Ok(Some(job_id))
    }
}

fn run_sbatch(job_dir: &JobDir) -> Result<u64> {
    let script_path = job_dir.script_path();
    let mut sbatch = Command::new("sbatch");
    sbatch.arg(&script_path);
    info!("Running sbatch process: {:?}", &sbatch);

    let output = sbatch.output().context("failed to execute sbatch")?;
    if !output.status.success() {
        bail!(
            "sbatch exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let job_id = parse_sbatch_ack(&stdout)?;
    info!("SLURM job id: {job_id}");
    Ok(job_id)
}

fn run_srun(job_dir: &JobDir) -> Result<()> {
    let init_file = job_dir.interactive_script_path();
    let mut srun = Command::new("srun");
    srun.args(["--pty", "bash", "--init-file"]).arg(&init_file);
    info!("Running interactive srun session: {:?}", &srun);

    let status = srun.status().context("failed to execute srun")?;
    if !status.success() {
        bail!("srun exited with {status}");
    }
    Ok(())
}

/// Parses sbatch's single-line `Submitted batch job <id>` acknowledgment.
fn parse_sbatch_ack(stdout: &str) -> Result<u64> {
    let line = stdout.trim();
    line.strip_prefix("Submitted batch job ")
        .and_then(|id| id.trim().parse().ok())
        .with_context(|| format!("unexpected sbatch output: {line:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_acknowledgment_line() {
        assert_eq!(parse_sbatch_ack("Submitted batch job 123456\n").unwrap(), 123456);
        assert_eq!(parse_sbatch_ack("Submitted batch job 1").unwrap(), 1);
    }

    #[test]
    fn rejects_garbage_acknowledgment() {
        assert!(parse_sbatch_ack("").is_err());
        assert!(parse_sbatch_ack("sbatch: error: invalid partition").is_err());
        assert!(parse_sbatch_ack("Submitted batch job abc").is_err());
        assert!(parse_sbatch_ack("Submitted batch job").is_err());
    }
}
