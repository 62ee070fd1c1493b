//! Submit resumable jobs to SLURM.
//!
//!  - Freezes source trees by archiving them into a separate job directory.
//!  - Generates a `job.sh` that stages data to the compute node's local
//!    filesystem (`$SLURM_TMPDIR`) for performance.
//!  - Exposes hooks for custom bash code: `setup`, `setup_resume`,
//!    `on_run`, `on_run_resume`, and `teardown`.
//!  - Interrupts the running worker process before the job time runs out.
//!  - Saves results back to the job directory.
//!  - On resuming an incomplete run, extracts intermediate saved results
//!    and runs the `*_resume` hooks.
//!
//! The persisted `status` record represents a state machine. On a given
//! submission, it goes through the steps:
//!
//! ```text
//! new/incomplete
//! initializing
//! running
//! [interrupting]
//! finalizing
//! completed/incomplete
//! ```
//!
//! If the run completes naturally, `status` ends with `completed`.
//! If it is interrupted by the scheduler's timeout signal, `status` passes
//! through `interrupting`, the job resubmits itself, and `status` ends with
//! `incomplete` until some later submission completes the work.

use std::path::PathBuf;

/// Freeze source trees into compressed archives via external tar
pub mod archive;
/// `{key}` template rendering against a configuration mapping
pub mod format;
/// Job description, script generation, and scheduler submission
pub mod slurm;
/// Persisted job state record and submission ledger
pub mod status;

/// Engine version recorded in every status record and generated script.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The durable, shared-storage root for one logical job across all of its
/// submissions. Created once by [`slurm::job_config::JobConfig::create`];
/// never recreated.
pub struct JobDir {
    pub path: PathBuf,
}

impl JobDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JobDir { path: path.into() }
    }

    /// The generated batch script submitted via sbatch.
    pub fn script_path(&self) -> PathBuf {
        self.path.join("job.sh")
    }

    /// Companion script sourced by interactive (srun) sessions.
    pub fn interactive_script_path(&self) -> PathBuf {
        self.path.join("job_interactive.sh")
    }

    /// Write-once archive of the frozen source trees.
    pub fn src_archive_path(&self) -> PathBuf {
        self.path.join("src.tar.gz")
    }
}
