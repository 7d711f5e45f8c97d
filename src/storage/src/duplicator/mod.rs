//! Copy-on-write file and directory cloning.
//!
//! `clone_file` is the single seam behind which the platform reflink
//! mechanism lives. On Linux and macOS the system copy utility is invoked
//! with its reflink flag; filesystems without CoW support fall back to a
//! plain copy inside the utility (`--reflink=auto`) or fail visibly
//! (`cp -c` on non-APFS). Platforms without a reflink path degrade to a
//! byte-for-byte copy.

use std::path::Path;

use geranos_core::{GeranosError, Result};

/// Clone a single file, sharing extents with the source where the
/// filesystem supports it.
#[cfg(target_os = "linux")]
pub fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    run_copy_command(
        std::process::Command::new("cp")
            .arg("--reflink=auto")
            .arg(src)
            .arg(dst),
        src,
        dst,
    )
}

/// Clone a single file using APFS clonefile semantics.
#[cfg(target_os = "macos")]
pub fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    run_copy_command(
        std::process::Command::new("cp").arg("-c").arg(src).arg(dst),
        src,
        dst,
    )
}

/// Byte-for-byte fallback for platforms without a reflink path.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst).map_err(|e| {
        GeranosError::Io(std::io::Error::new(
            e.kind(),
            format!(
                "unable to copy '{}' to '{}': {e}",
                src.display(),
                dst.display()
            ),
        ))
    })?;
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn run_copy_command(command: &mut std::process::Command, src: &Path, dst: &Path) -> Result<()> {
    let output = command.output().map_err(|e| {
        GeranosError::Io(std::io::Error::new(
            e.kind(),
            format!("unable to run the system copy utility: {e}"),
        ))
    })?;
    if !output.status.success() {
        return Err(GeranosError::Io(std::io::Error::other(format!(
            "cloning '{}' to '{}' failed: {}",
            src.display(),
            dst.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }
    Ok(())
}

/// Clone a directory entry by entry. Subdirectories are only descended
/// into when `recursive` is set; otherwise they are skipped.
pub fn clone_directory(src: &Path, dst: &Path, recursive: bool) -> Result<()> {
    let entries = std::fs::read_dir(src).map_err(|e| {
        GeranosError::Io(std::io::Error::new(
            e.kind(),
            format!("unable to read dir '{}': {e}", src.display()),
        ))
    })?;

    std::fs::create_dir_all(dst).map_err(|e| {
        GeranosError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create dst directory '{}': {e}", dst.display()),
        ))
    })?;

    for entry in entries {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            if recursive {
                clone_directory(&src_path, &dst_path, recursive)?;
            }
        } else {
            clone_file(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
