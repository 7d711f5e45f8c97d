use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use geranos_core::{GeranosError, Result};

/// Read buffer in front of the raw file handle; segment bodies are read
/// linearly in large sweeps.
const READ_BUF_SIZE: usize = 512 * 1024;

/// Buffered reader over the inclusive `[start, stop]` byte range of a file.
///
/// The file handle is opened here and released when the reader is dropped.
pub(crate) struct SectionReader {
    inner: BufReader<io::Take<File>>,
}

impl SectionReader {
    pub(crate) fn open(path: &Path, start: i64, stop: i64) -> Result<SectionReader> {
        let size = stop - start + 1;
        if size <= 0 {
            return Err(GeranosError::BadRange(format!(
                "invalid range: start ({start}) must be less than or equal to stop ({stop})"
            )));
        }
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len() as i64;
        if start >= file_size {
            return Err(GeranosError::BadRange(format!(
                "start position ({start}) is beyond file size ({file_size})"
            )));
        }
        let stop = stop.min(file_size - 1);
        let size = (stop - start + 1) as u64;

        file.seek(SeekFrom::Start(start as u64))?;
        Ok(SectionReader {
            inner: BufReader::with_capacity(READ_BUF_SIZE, file.take(size)),
        })
    }
}

impl Read for SectionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
