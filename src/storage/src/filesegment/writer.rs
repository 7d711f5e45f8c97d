use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

use geranos_core::{GeranosError, Result};

use super::SegmentDescriptor;

/// Open `dir/filename` read-write (creating it with mode 0644 if absent)
/// and position it at the descriptor's start offset. The returned handle
/// is the sink for the sparse copy of one segment body.
pub fn segment_writer(dir: &Path, descriptor: &SegmentDescriptor) -> Result<File> {
    let path = dir.join(descriptor.filename());
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options.open(&path).map_err(|e| {
        GeranosError::Io(std::io::Error::new(
            e.kind(),
            format!("unable to open file '{}': {e}", path.display()),
        ))
    })?;
    file.seek(SeekFrom::Start(descriptor.start() as u64))
        .map_err(|e| {
            GeranosError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "error while seeking to position '{}': {e}",
                    descriptor.start()
                ),
            ))
        })?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::Hash;
    use std::io::Write;

    fn descriptor(filename: &str, start: i64, stop: i64) -> SegmentDescriptor {
        SegmentDescriptor::new(filename, start, stop, Hash::sha256_of_bytes(b"x"), None)
    }

    #[test]
    fn test_writer_creates_file_and_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor("disk.img", 5, 9);

        let mut f = segment_writer(dir.path(), &d).unwrap();
        f.write_all(b"hello").unwrap();
        drop(f);

        let content = std::fs::read(dir.path().join("disk.img")).unwrap();
        assert_eq!(content.len(), 10);
        assert_eq!(&content[5..], b"hello");
        assert!(content[..5].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_writer_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk.img"), b"0123456789").unwrap();

        let d = descriptor("disk.img", 2, 4);
        let mut f = segment_writer(dir.path(), &d).unwrap();
        f.write_all(b"XYZ").unwrap();
        drop(f);

        let content = std::fs::read(dir.path().join("disk.img")).unwrap();
        assert_eq!(content, b"01XYZ56789");
    }

    #[cfg(unix)]
    #[test]
    fn test_writer_creates_with_expected_mode() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let d = descriptor("disk.img", 0, 4);
        let _ = segment_writer(dir.path(), &d).unwrap();

        let mode = std::fs::metadata(dir.path().join("disk.img")).unwrap().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
