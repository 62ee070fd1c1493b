use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::format::display_value;

/// The five bash fragments a caller hangs on the job lifecycle.
///
/// `setup`/`on_run` run on a job's first submission, the `*_resume` variants
/// on every later one. `setup_resume` may simply call `setup` to reuse its
/// code. `on_run`/`on_run_resume` must each be a single command; they are
/// launched in the background so the script can supervise them.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Hooks {
    pub setup: String,
    pub setup_resume: String,
    pub on_run: String,
    pub on_run_resume: String,
    pub teardown: String,
}

/// Strategy for mirroring the results directory between the job directory
/// and the compute node's local storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsSyncMethod {
    /// Sync the results directory via rsync.
    Rsync,
    /// Symlink the local results directory straight into the job directory.
    Symlink,
    /// Round-trip the results directory through `results.tar.gz`.
    Targz,
}

impl Default for ResultsSyncMethod {
    fn default() -> Self {
        ResultsSyncMethod::Symlink
    }
}

impl fmt::Display for ResultsSyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResultsSyncMethod::Rsync => write!(f, "rsync"),
            ResultsSyncMethod::Symlink => write!(f, "symlink"),
            ResultsSyncMethod::Targz => write!(f, "targz"),
        }
    }
}

impl ResultsSyncMethod {
    /// Fragment spliced into the script's `extract_results` function.
    pub(crate) fn extract_fragment(&self) -> &'static str {
        match self {
            ResultsSyncMethod::Rsync => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/extract_results_rsync.txt"
            )),
            ResultsSyncMethod::Symlink => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/extract_results_symlink.txt"
            )),
            ResultsSyncMethod::Targz => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/extract_results_targz.txt"
            )),
        }
    }

    /// Fragment spliced into the script's `save_results` function.
    pub(crate) fn save_fragment(&self) -> &'static str {
        match self {
            ResultsSyncMethod::Rsync => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/save_results_rsync.txt"
            )),
            ResultsSyncMethod::Symlink => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/save_results_symlink.txt"
            )),
            ResultsSyncMethod::Targz => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/data/templates/save_results_targz.txt"
            )),
        }
    }
}

/// A complete job description, usually loaded from a YAML file.
///
/// `job_dir` is a template: `{job_name}`, `{date:...}` and keys from
/// `config` are resolved before the directory is created.
#[derive(Clone, Debug, Deserialize)]
pub struct JobConfig {
    pub job_dir: String,
    /// Source directories frozen into `src.tar.gz`, merged under `src/`.
    #[serde(default)]
    pub src: Vec<String>,
    /// Optional `.tar` dataset extracted on the compute node. Never copied
    /// into the job directory.
    #[serde(default)]
    pub dataset: String,
    #[serde(flatten)]
    pub hooks: Hooks,
    /// Options passed to sbatch as `#SBATCH --key=value` directives.
    #[serde(default)]
    pub sbatch_options: BTreeMap<String, Value>,
    /// Seconds before the hard time limit at which the job is interrupted
    /// to run cleanup (teardown, save results, resubmit).
    #[serde(default = "default_cleanup_seconds")]
    pub cleanup_seconds: u32,
    /// Submit the created job directory to the scheduler right away.
    #[serde(default = "default_true")]
    pub submit: bool,
    /// Run as a blocking interactive session instead of a batch job.
    #[serde(default)]
    pub interactive: bool,
    /// Maximum number of automatic resubmissions before the chain is cut.
    #[serde(default = "default_resubmit_limit")]
    pub resubmit_limit: u32,
    #[serde(default)]
    pub results_sync_method: ResultsSyncMethod,
    /// Free-form config referenced by `{...}` placeholders in `job_dir`.
    #[serde(default)]
    pub config: Option<Value>,
}

fn default_cleanup_seconds() -> u32 {
    120
}

fn default_resubmit_limit() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Job name taken from the sbatch options, like sbatch itself would.
    pub fn job_name(&self) -> String {
        self.sbatch_options
            .get("job-name")
            .map(display_value)
            .unwrap_or_else(|| "untitled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_round_trip_with_defaults() {
        let yaml = r#"
job_dir: "$HOME/jobs/{date:%Y-%m-%d}_{job_name}"
src: ["./src"]
on_run: "python main.py"
on_run_resume: "python main.py --resume"
setup: |
  module load python
sbatch_options:
  job-name: example
  time: "3:00:00"
  nodes: 1
"#;
        let job: JobConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.job_name(), "example");
        assert_eq!(job.cleanup_seconds, 120);
        assert_eq!(job.resubmit_limit, 64);
        assert!(job.submit);
        assert!(!job.interactive);
        assert_eq!(job.results_sync_method, ResultsSyncMethod::Symlink);
        assert_eq!(job.hooks.on_run, "python main.py");
        assert_eq!(job.hooks.setup, "module load python\n");
        assert_eq!(job.hooks.teardown, "");
        // numeric sbatch values survive as numbers
        assert_eq!(job.sbatch_options.get("nodes"), Some(&Value::from(1)));
    }

    #[test]
    fn sync_method_parses_lowercase() {
        let job: JobConfig =
            serde_yaml::from_str("job_dir: /tmp/j\nresults_sync_method: targz\n").unwrap();
        assert_eq!(job.results_sync_method, ResultsSyncMethod::Targz);
        assert_eq!(job.results_sync_method.to_string(), "targz");
    }

    #[test]
    fn missing_job_name_defaults_to_untitled() {
        let job: JobConfig = serde_yaml::from_str("job_dir: /tmp/j\n").unwrap();
        assert_eq!(job.job_name(), "untitled");
    }
}
