use std::io::{self, Read, Seek, SeekFrom, Write};

use super::{is_all_zeroes, BUF_SIZE};

/// Copy `src` into `dst`, collapsing runs of zero bytes into seeks.
///
/// Zero chunks are accumulated as a deferred skip and only turned into a
/// relative seek when non-zero data follows. If the stream ends with a
/// deferred skip, exactly one trailing zero byte is written after seeking
/// past the rest, so the destination length equals the source length and
/// the hole extends to end-of-file.
///
/// Returns `(written, skipped)`; their sum equals the number of bytes read
/// from `src`.
pub fn copy<D, S>(dst: &mut D, src: &mut S) -> io::Result<(u64, u64)>
where
    D: Write + Seek,
    S: Read,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut written: u64 = 0;
    let mut skipped: u64 = 0;
    let mut deferred: u64 = 0;

    loop {
        match src.read(&mut buf) {
            Ok(0) => {
                if deferred > 0 {
                    // Materialize the last deferred byte so the file length
                    // is exact; everything before it stays a hole.
                    deferred -= 1;
                    dst.seek(SeekFrom::Current(deferred as i64))?;
                    skipped += deferred;
                    dst.write_all(&[0u8])?;
                    written += 1;
                }
                break;
            }
            Ok(n) => {
                if is_all_zeroes(&buf[..n]) {
                    deferred += n as u64;
                    continue;
                }
                if deferred > 0 {
                    dst.seek(SeekFrom::Current(deferred as i64))?;
                    skipped += deferred;
                    deferred = 0;
                }
                dst.write_all(&buf[..n])?;
                written += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Flush the pending skip so the destination position is
                // accounted for, then propagate the read error.
                if deferred > 0 {
                    deferred -= 1;
                    let _ = dst.seek(SeekFrom::Current(deferred as i64));
                    let _ = dst.write_all(&[0u8]);
                }
                return Err(e);
            }
        }
    }

    Ok((written, skipped))
}
