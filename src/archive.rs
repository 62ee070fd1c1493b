//! Freeze source trees into compressed archives via external tar
//!
//! Archives are created once at job-directory creation so later edits to the
//! original trees can't affect in-flight runs. GNU tar does the work: it
//! keeps executable bits and `--transform` rewrites the leading `./` so one
//! or more source directories land merged under a single root inside the
//! archive.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::info;

/// Archives the trees under `src_dirs` into `dst`, merged under `root_name/`.
pub fn create_tar_dirs(src_dirs: &[impl AsRef<Path>], dst: &Path, root_name: &str) -> Result<()> {
    if src_dirs.is_empty() {
        bail!("no source directories to archive into {}", dst.display());
    }

    let mut tar = Command::new("tar");
    tar.arg("czf").arg(dst);
    for src in src_dirs {
        tar.arg("-C").arg(src.as_ref()).arg(".");
    }
    tar.arg("--transform")
        .arg(format!("s/^\\./{root_name}/"));

    info!("Archiving {} source tree(s) into {}", src_dirs.len(), dst.display());
    run_tar(tar)
}

/// Extracts `archive` into `dest`.
pub fn extract_tar(archive: &Path, dest: &Path) -> Result<()> {
    let mut tar = Command::new("tar");
    tar.arg("xf").arg(archive).arg("-C").arg(dest);

    info!("Extracting {} into {}", archive.display(), dest.display());
    run_tar(tar)
}

fn run_tar(mut tar: Command) -> Result<()> {
    let output = tar.output().context("failed to execute tar")?;
    if !output.status.success() {
        bail!(
            "tar exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn round_trip_merges_trees_and_keeps_exec_bits() {
        let root = tempdir().unwrap();
        let src_a = root.path().join("a");
        let src_b = root.path().join("b");
        fs::create_dir_all(src_a.join("nested")).unwrap();
        fs::create_dir(&src_b).unwrap();
        fs::write(src_a.join("nested/data.txt"), "payload").unwrap();
        let tool = src_a.join("tool.sh");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src_b.join("extra.txt"), "more").unwrap();

        let archive = root.path().join("src.tar.gz");
        create_tar_dirs(&[&src_a, &src_b], &archive, "src").unwrap();

        let out = root.path().join("out");
        fs::create_dir(&out).unwrap();
        extract_tar(&archive, &out).unwrap();

        assert_eq!(fs::read_to_string(out.join("src/nested/data.txt")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(out.join("src/extra.txt")).unwrap(), "more");
        let mode = fs::metadata(out.join("src/tool.sh")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0, "executable bit lost in round trip");
    }

    #[test]
    fn empty_source_list_is_rejected() {
        let root = tempdir().unwrap();
        let archive = root.path().join("src.tar.gz");
        let none: &[&Path] = &[];
        assert!(create_tar_dirs(none, &archive, "src").is_err());
    }
}
