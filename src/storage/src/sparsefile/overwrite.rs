use std::io::{self, Read, Seek, SeekFrom, Write};

use super::BUF_SIZE;

/// Copy `src` over `dst`, skipping chunks that are already identical.
///
/// For every chunk read from `src`, the same-sized chunk is read from the
/// current destination position. The matching prefix is skipped (position
/// advanced without writing); the rest of the chunk is written after
/// rewinding to where the match ended. Useful when the destination is a
/// reflink scaffold that already holds most of the target content: skipped
/// chunks keep their shared extents.
///
/// Returns `(written, skipped)`.
pub fn overwrite<D, S>(dst: &mut D, src: &mut S) -> io::Result<(u64, u64)>
where
    D: Read + Write + Seek,
    S: Read,
{
    let mut src_buf = vec![0u8; BUF_SIZE];
    let mut dst_buf = vec![0u8; BUF_SIZE];
    let mut written: u64 = 0;
    let mut skipped: u64 = 0;

    let mut dst_pos = dst.seek(SeekFrom::Current(0))?;

    loop {
        let nr_src = match src.read(&mut src_buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        // A short or failed destination read just means less of the chunk
        // can match; the remainder is written out.
        let nr_dst = dst.read(&mut dst_buf[..nr_src]).unwrap_or(0);
        let nr_min = nr_src.min(nr_dst);

        let to_write = if src_buf[..nr_min] == dst_buf[..nr_min] {
            dst_pos += nr_min as u64;
            skipped += nr_min as u64;
            &src_buf[nr_min..nr_src]
        } else {
            &src_buf[..nr_src]
        };

        dst_pos = dst.seek(SeekFrom::Start(dst_pos))?;
        dst.write_all(to_write)?;
        dst_pos += to_write.len() as u64;
        written += to_write.len() as u64;
    }

    Ok((written, skipped))
}
