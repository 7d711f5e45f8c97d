use std::io::{self, Seek, SeekFrom, Write};

use super::is_all_zeroes;

/// A `Write` adapter that turns all-zero writes into deferred seeks.
///
/// Used when a layer body is teed into the disk cache while being read:
/// the cache copy stays sparse without a second pass. Call [`finish`] when
/// done; it materializes the final deferred byte so the file length is
/// exact.
///
/// [`finish`]: SparseWriter::finish
pub struct SparseWriter<W: Write + Seek> {
    inner: W,
    deferred: u64,
}

impl<W: Write + Seek> SparseWriter<W> {
    pub fn new(inner: W) -> SparseWriter<W> {
        SparseWriter { inner, deferred: 0 }
    }

    /// Flush any trailing deferred skip and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        if self.deferred > 0 {
            self.deferred -= 1;
            self.inner.seek(SeekFrom::Current(self.deferred as i64))?;
            self.inner.write_all(&[0u8])?;
            self.deferred = 0;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for SparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() <= super::BUF_SIZE && is_all_zeroes(buf) {
            self.deferred += buf.len() as u64;
            return Ok(buf.len());
        }
        if self.deferred > 0 {
            self.inner.seek(SeekFrom::Current(self.deferred as i64))?;
            self.deferred = 0;
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
