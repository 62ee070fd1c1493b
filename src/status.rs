//! Persisted job state record and submission ledger
//!
//! All cross-submission state lives in the job directory: a `status` record
//! of `key=value` lines and a `job_ids` ledger with one scheduler-assigned
//! id per line. The generated script reads and rewrites the same files, so
//! the byte format is shared with bash (`source`-able keys).

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::info;

use crate::VERSION;

/// File holding the status record inside a job directory.
pub const STATUS_FILE: &str = "status";
/// File holding the append-only ledger of submission ids.
pub const LEDGER_FILE: &str = "job_ids";

const STATE_KEY: &str = "status";
const VERSION_KEY: &str = "jatkuu_version";
const RESUBMIT_COUNT_KEY: &str = "resubmit_count";

/// Lifecycle state of a job.
///
/// On a given submission the state advances `new`/`incomplete` →
/// `initializing` → `running` → [`interrupting`] → `finalizing` →
/// `completed`/`incomplete`. Only the generated script writes intermediate
/// states; this crate writes `new` once at job-directory creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    New,
    Initializing,
    Running,
    Interrupting,
    Finalizing,
    Completed,
    Incomplete,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Initializing => "initializing",
            JobState::Running => "running",
            JobState::Interrupting => "interrupting",
            JobState::Finalizing => "finalizing",
            JobState::Completed => "completed",
            JobState::Incomplete => "incomplete",
        }
    }

    /// `completed` is the only terminal state; it is never advanced.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(JobState::New),
            "initializing" => Ok(JobState::Initializing),
            "running" => Ok(JobState::Running),
            "interrupting" => Ok(JobState::Interrupting),
            "finalizing" => Ok(JobState::Finalizing),
            "completed" => Ok(JobState::Completed),
            "incomplete" => Ok(JobState::Incomplete),
            other => bail!("unrecognized job status: {other}"),
        }
    }
}

/// The status record persisted in `$JOB_DIR/status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub version: String,
    pub resubmit_count: u32,
}

impl JobStatus {
    /// Record written when a job directory is first created.
    pub fn fresh() -> Self {
        JobStatus {
            state: JobState::New,
            version: VERSION.to_string(),
            resubmit_count: 0,
        }
    }

    pub fn load(job_dir: &Path) -> Result<Self> {
        let path = job_dir.join(STATUS_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("can't read status record at {}", path.display()))?;

        let mut state = None;
        let mut version = None;
        let mut resubmit_count = None;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                STATE_KEY => state = Some(value.parse::<JobState>()?),
                VERSION_KEY => version = Some(value.to_string()),
                RESUBMIT_COUNT_KEY => {
                    resubmit_count = Some(value.parse::<u32>().with_context(|| {
                        format!("bad {RESUBMIT_COUNT_KEY} in {}", path.display())
                    })?)
                }
                _ => {}
            }
        }

        let Some(state) = state else {
            bail!("status record at {} has no {STATE_KEY} line", path.display());
        };
        Ok(JobStatus {
            state,
            version: version.unwrap_or_default(),
            resubmit_count: resubmit_count.unwrap_or(0),
        })
    }

    pub fn store(&self, job_dir: &Path) -> Result<()> {
        let path = job_dir.join(STATUS_FILE);
        let contents = format!(
            "{STATE_KEY}={}\n{VERSION_KEY}={}\n{RESUBMIT_COUNT_KEY}={}\n",
            self.state, self.version, self.resubmit_count
        );
        fs::write(&path, contents)
            .with_context(|| format!("can't write status record at {}", path.display()))
    }
}

/// Appends a scheduler-assigned submission id to the job's ledger.
pub fn append_job_id(job_dir: &Path, job_id: u64) -> Result<()> {
    let path = job_dir.join(LEDGER_FILE);
    info!("Appending submission id {job_id} to {}", path.display());
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("can't open ledger at {}", path.display()))?;
    writeln!(file, "{job_id}")?;
    Ok(())
}

/// Reads the ledger in dispatch order. An absent ledger is an empty chain.
pub fn read_job_ids(job_dir: &Path) -> Result<Vec<u64>> {
    let path = job_dir.join(LEDGER_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("can't read ledger at {}", path.display()))?;
    text.lines()
        .map(|line| {
            line.trim()
                .parse::<u64>()
                .with_context(|| format!("bad ledger entry {line:?} in {}", path.display()))
        })
        .collect()
}
