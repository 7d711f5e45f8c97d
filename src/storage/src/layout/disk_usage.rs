use std::path::Path;

use geranos_core::{GeranosError, Result};

/// Physical disk usage of a directory as a human-readable string, via the
/// platform `du` utility. Unlike a logical size walk, this reflects holes
/// and shared reflink extents.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn directory_disk_usage(path: &Path) -> Result<String> {
    let output = std::process::Command::new("du")
        .arg("-sh")
        .arg(path)
        .output()
        .map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!("unable to run du: {e}"),
            ))
        })?;
    if !output.status.success() {
        return Err(GeranosError::Io(std::io::Error::other(format!(
            "du failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let usage = stdout
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(usage)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn directory_disk_usage(_path: &Path) -> Result<String> {
    Err(GeranosError::Unsupported(
        "disk usage reporting is not supported on this platform".to_string(),
    ))
}
