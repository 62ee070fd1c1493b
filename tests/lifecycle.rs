//! End-to-end runs of the generated job script under bash, with a scratch
//! directory standing in for the compute node's `$SLURM_TMPDIR`. The
//! completion and resume paths never reach sbatch, so the full state
//! machine can run on any machine with bash and tar.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use jatkuu::archive::extract_tar;
use jatkuu::slurm::job_config::JobConfig;
use jatkuu::status::{read_job_ids, JobState, JobStatus};
use jatkuu::{JobDir, VERSION};
use tempfile::tempdir;

fn create_job(root: &Path, sync_method: &str) -> JobDir {
    let src = root.join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("worker.txt"), "frozen source\n").unwrap();

    let yaml = format!(
        r#"
job_dir: '{job_dir}'
src: ['{src}']
submit: false
results_sync_method: {sync_method}
setup: 'touch "$SLURM_TMPDIR/setup_ran"'
setup_resume: 'touch "$SLURM_TMPDIR/resume_ran"'
on_run: 'echo first > "$SLURM_TMPDIR/results/out.txt"'
on_run_resume: 'echo resumed >> "$SLURM_TMPDIR/results/out.txt"'
teardown: 'echo teardown'
sbatch_options:
  job-name: lifecycle-test
  time: "0:10:00"
"#,
        job_dir = root.join("job").display(),
        src = src.display(),
    );
    let job: JobConfig = serde_yaml::from_str(&yaml).unwrap();
    job.submit().unwrap()
}

fn run_script(job_dir: &JobDir, scratch: &Path) -> Output {
    fs::create_dir_all(scratch).unwrap();
    Command::new("bash")
        .arg(job_dir.script_path())
        .env("SLURM_TMPDIR", scratch)
        .output()
        .expect("bash is available")
}

fn mark_incomplete(job_dir: &JobDir, resubmit_count: u32) {
    JobStatus {
        state: JobState::Incomplete,
        version: VERSION.to_string(),
        resubmit_count,
    }
    .store(&job_dir.path)
    .unwrap();
}

fn results_file(job_dir: &JobDir, sync_method: &str, scratch_root: &Path) -> PathBuf {
    match sync_method {
        "targz" => {
            let unpacked = scratch_root.join("unpacked");
            fs::create_dir_all(&unpacked).unwrap();
            extract_tar(&job_dir.path.join("results.tar.gz"), &unpacked).unwrap();
            unpacked.join("results/out.txt")
        }
        _ => job_dir.path.join("results/out.txt"),
    }
}

fn complete_and_resume(sync_method: &str) {
    let root = tempdir().unwrap();
    let job_dir = create_job(root.path(), sync_method);

    // first submission: runs to natural completion
    let scratch = root.path().join("scratch1");
    let output = run_script(&job_dir, &scratch);
    assert!(
        output.status.success(),
        "first run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(scratch.join("setup_ran").exists());
    assert!(!scratch.join("resume_ran").exists());
    assert!(scratch.join("src/worker.txt").exists(), "frozen source extracted");

    let status = JobStatus::load(&job_dir.path).unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.resubmit_count, 0);
    let out = results_file(&job_dir, sync_method, root.path());
    assert_eq!(fs::read_to_string(&out).unwrap(), "first\n");

    // a later submission resuming interrupted work picks the resume hooks
    mark_incomplete(&job_dir, 1);
    let scratch2 = root.path().join("scratch2");
    let output = run_script(&job_dir, &scratch2);
    assert!(
        output.status.success(),
        "resume run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(scratch2.join("resume_ran").exists());
    assert!(!scratch2.join("setup_ran").exists(), "first-run setup must not run on resume");

    let status = JobStatus::load(&job_dir.path).unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.resubmit_count, 1);
    let out = results_file(&job_dir, sync_method, root.path());
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "first\nresumed\n",
        "results written during running must round-trip into durable storage"
    );

    // nothing was dispatched, so the ledger stays empty
    assert!(read_job_ids(&job_dir.path).unwrap().is_empty());
}

#[test]
fn symlink_sync_completes_and_resumes() {
    complete_and_resume("symlink");
}

#[test]
fn targz_sync_completes_and_resumes() {
    complete_and_resume("targz");
}

#[test]
fn rsync_sync_completes_and_resumes() {
    let rsync_available = Command::new("rsync")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !rsync_available {
        eprintln!("rsync not available, skipping");
        return;
    }
    complete_and_resume("rsync");
}

#[test]
fn completed_job_is_never_advanced() {
    let root = tempdir().unwrap();
    let job_dir = create_job(root.path(), "symlink");

    let output = run_script(&job_dir, &root.path().join("scratch1"));
    assert!(output.status.success());
    assert_eq!(JobStatus::load(&job_dir.path).unwrap().state, JobState::Completed);

    // re-running the script is an idempotent no-op
    let output = run_script(&job_dir, &root.path().join("scratch2"));
    assert!(output.status.success());
    let status = JobStatus::load(&job_dir.path).unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(
        fs::read_to_string(job_dir.path.join("results/out.txt")).unwrap(),
        "first\n"
    );
}

#[test]
fn unrecognized_status_is_fatal() {
    let root = tempdir().unwrap();
    let job_dir = create_job(root.path(), "symlink");
    fs::write(
        job_dir.path.join("status"),
        "status=meditating\njatkuu_version=0\nresubmit_count=0\n",
    )
    .unwrap();

    let output = run_script(&job_dir, &root.path().join("scratch"));
    assert!(!output.status.success());
}

fn create_interruptible_job(root: &Path, resubmit_limit: u32) -> JobDir {
    let yaml = format!(
        r#"
job_dir: '{job_dir}'
submit: false
resubmit_limit: {resubmit_limit}
results_sync_method: symlink
on_run: 'bash -c "touch $SLURM_TMPDIR/run_started; exec sleep 30"'
on_run_resume: 'true'
teardown: 'echo teardown'
sbatch_options:
  job-name: interrupt-test
"#,
        job_dir = root.join("job").display(),
    );
    let job: JobConfig = serde_yaml::from_str(&yaml).unwrap();
    job.submit().unwrap()
}

/// Starts the script, waits for the run hook to come up, then delivers the
/// scheduler's timeout signal.
fn run_and_interrupt(job_dir: &JobDir, scratch: &Path) -> std::process::ExitStatus {
    fs::create_dir_all(scratch).unwrap();
    let mut child = Command::new("bash")
        .arg(job_dir.script_path())
        .env("SLURM_TMPDIR", scratch)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("bash is available");

    let marker = scratch.join("run_started");
    let deadline = Instant::now() + Duration::from_secs(15);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "run hook never started");
        sleep(Duration::from_millis(50));
    }

    let delivered = Command::new("bash")
        .args(["-c", &format!("kill -USR1 {}", child.id())])
        .status()
        .expect("bash is available");
    assert!(delivered.success());

    child.wait().expect("script exits after interrupt")
}

#[test]
fn interrupt_increments_count_and_attempts_resubmission() {
    let root = tempdir().unwrap();
    let job_dir = create_interruptible_job(root.path(), 64);

    // sbatch is absent here, so the resubmission attempt itself fails; the
    // status record is persisted before dispatch and must survive.
    let status = run_and_interrupt(&job_dir, &root.path().join("scratch"));
    assert!(!status.success(), "dispatch failure aborts the script");

    let status = JobStatus::load(&job_dir.path).unwrap();
    assert_eq!(status.state, JobState::Incomplete);
    assert_eq!(status.resubmit_count, 1);
    // no id was acknowledged, so the ledger must not grow
    assert!(read_job_ids(&job_dir.path).unwrap().is_empty());
}

#[test]
fn interrupt_beyond_resubmit_limit_abandons_the_chain() {
    let root = tempdir().unwrap();
    let job_dir = create_interruptible_job(root.path(), 0);

    let status = run_and_interrupt(&job_dir, &root.path().join("scratch"));
    assert!(status.success(), "hitting the limit is a designed terminal state");

    let status = JobStatus::load(&job_dir.path).unwrap();
    assert_eq!(status.state, JobState::Incomplete);
    assert_eq!(status.resubmit_count, 0, "count never exceeds the limit");
    assert!(read_job_ids(&job_dir.path).unwrap().is_empty());
}
