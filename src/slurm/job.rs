use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde_json::json;

use crate::archive::create_tar_dirs;
use crate::format;
use crate::slurm::job_config::JobConfig;
use crate::status::JobStatus;
use crate::{JobDir, VERSION};

/// included job script template
///
/// Stored as plain bash: literal braces stay single and substitution points
/// are written `{{name}}`. [`prepare_template`] swaps the two conventions
/// before rendering.
static JOB_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/data/templates/job_script.txt"
));

/// included interactive companion template
static JOB_INTERACTIVE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/data/templates/job_interactive.txt"
));

/// Environment handed to user hooks. `SLURM_TMPDIR` comes from the scheduler.
static VARS_TEMPLATE: &str = r#"export JATKUU_VERSION="{{version}}"
export JOB_DIR="{{job_dir}}"
export DATASET_PATH="{{dataset_path}}"
export RESUBMIT_LIMIT="{{resubmit_limit}}""#;

impl JobConfig {
    /// Creates the job directory with frozen sources, a fresh status record,
    /// and both generated scripts. The directory is created exactly once;
    /// an existing directory is an error, never overwritten.
    pub fn create(&self) -> Result<JobDir> {
        let job_dir = JobDir::new(self.render_job_dir_path()?);
        info!(
            "Creating job {} in {}",
            self.job_name(),
            job_dir.path.display()
        );

        if job_dir.path.exists() {
            bail!(
                "job directory {} already exists; refusing to recreate it",
                job_dir.path.display()
            );
        }
        if let Some(parent) = job_dir.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("can't create {}", parent.display()))?;
        }
        fs::create_dir(&job_dir.path)
            .with_context(|| format!("can't create {}", job_dir.path.display()))?;

        if !self.src.is_empty() {
            let src_dirs = self
                .src
                .iter()
                .map(|dir| expand_path(dir))
                .collect::<Result<Vec<_>>>()?;
            create_tar_dirs(&src_dirs, &job_dir.src_archive_path(), "src")?;
        }

        JobStatus::fresh().store(&job_dir.path)?;

        write_script(&job_dir.script_path(), &self.job_script_source(&job_dir)?)?;
        write_script(
            &job_dir.interactive_script_path(),
            &self.interactive_script_source(&job_dir)?,
        )?;

        Ok(job_dir)
    }

    /// Renders the `job_dir` template in two passes: first silently against
    /// the job identity (`{job_name}`, `{date:...}`), then strictly against
    /// the user config, so leftover keys fail loudly.
    fn render_job_dir_path(&self) -> Result<PathBuf> {
        let identity = json!({ "job_name": self.job_name() });
        let partial = format::format_with_config_silent(&self.job_dir, &identity)?;
        let user_config = self.config.clone().unwrap_or_else(|| json!({}));
        let rendered = format::format_with_config(&partial, &user_config)?;
        expand_path(&rendered)
    }

    /// Returns source for the batch job script.
    pub fn job_script_source(&self, job_dir: &JobDir) -> Result<String> {
        let dataset_path = if self.dataset.is_empty() {
            String::new()
        } else {
            expand_path(&self.dataset)?.display().to_string()
        };

        let vars = format::format_with_config(
            &prepare_template(VARS_TEMPLATE),
            &json!({
                "version": VERSION,
                "job_dir": job_dir.path.display().to_string(),
                "dataset_path": dataset_path,
                "resubmit_limit": self.resubmit_limit,
            }),
        )?;

        let context = json!({
            "sbatch_options": self.sbatch_options_to_str(&job_dir.path),
            "vars": vars,
            "setup": fix_indent(&self.hooks.setup, 1),
            "setup_resume": fix_indent(&self.hooks.setup_resume, 1),
            "teardown": fix_indent(&self.hooks.teardown, 1),
            "on_run": quote_single_quotes(self.hooks.on_run.trim()),
            "on_run_resume": quote_single_quotes(self.hooks.on_run_resume.trim()),
            "extract_results": fix_indent(self.results_sync_method.extract_fragment(), 1),
            "save_results": fix_indent(self.results_sync_method.save_fragment(), 1),
        });

        Ok(format::format_with_config(
            &prepare_template(JOB_SCRIPT),
            &context,
        )?)
    }

    /// Returns source for the companion script that interactive sessions
    /// source to enter the batch script with the interactive flag.
    pub fn interactive_script_source(&self, job_dir: &JobDir) -> Result<String> {
        let context = json!({
            "job_path": job_dir.script_path().display().to_string(),
        });
        Ok(format::format_with_config(
            &prepare_template(JOB_INTERACTIVE),
            &context,
        )?)
    }

    /// Renders the `#SBATCH` directive block. The output log path and the
    /// timeout signal are always forced, overriding caller values.
    fn sbatch_options_to_str(&self, job_dir: &Path) -> String {
        let mut options = self.sbatch_options.clone();
        options.insert(
            "output".to_string(),
            format!("{}/slurm_jobid%j_%x.out", job_dir.display()).into(),
        );
        options.insert(
            "signal".to_string(),
            format!("B:USR1@{}", self.cleanup_seconds).into(),
        );
        options
            .iter()
            .map(|(key, value)| format!("#SBATCH --{key}={}", format::display_value(value)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Expands `~` and `$VARS` and absolutizes, like a shell would before the
/// path reaches sbatch.
pub(crate) fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(path).map_err(|err| anyhow!("can't expand path {path:?}: {err}"))?;
    std::path::absolute(Path::new(expanded.as_ref()))
        .with_context(|| format!("can't absolutize path {path:?}"))
}

/// Writes a generated script and sets its executable bits.
fn write_script(path: &Path, source: &str) -> Result<()> {
    info!("Writing script to {}", path.display());
    let mut text = source.trim_matches('\n').to_string();
    text.push('\n');
    fs::write(path, text).with_context(|| format!("can't write script {}", path.display()))?;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Swaps the on-disk template convention (`{{name}}` substitution points,
/// single literal braces) into renderable form in a single scan.
fn prepare_template(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len() * 2);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push('}');
                i += 2;
            }
            b'{' => {
                out.push_str("{{");
                i += 1;
            }
            b'}' => {
                out.push_str("}}");
                i += 1;
            }
            _ => {
                let ch = raw[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out.trim_matches('\n').to_string()
}

/// Normalizes a hook body for splicing into a shell function: strips the
/// common leading whitespace, then indents every non-blank line `level`
/// levels of two spaces.
pub(crate) fn fix_indent(body: &str, level: usize) -> String {
    let body = body.trim_matches('\n');
    let margin = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let prefix = "  ".repeat(level);

    body.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{}", &line[margin..])
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replaces `'` with `'"'"'` so a hook body survives embedding in a
/// single-quoted shell string.
pub(crate) fn quote_single_quotes(s: &str) -> String {
    s.replace('\'', r#"'"'"'"#)
}
