//! Sparse-aware byte stream copying.
//!
//! Runs of zero bytes are not written; they are turned into seeks on the
//! destination so the filesystem can keep holes. On filesystems without
//! hole support the seeks still produce correct (if fully allocated) files.

mod copy;
mod overwrite;
mod writer;

pub use copy::copy;
pub use overwrite::overwrite;
pub use writer::SparseWriter;

/// Chunk size shared by all sparse copy paths.
pub(crate) const BUF_SIZE: usize = 64 * 1024;

static ZEROES: [u8; BUF_SIZE] = [0u8; BUF_SIZE];

/// True if every byte of `p` is zero. Slice equality compiles down to a
/// bulk memory compare, an order of magnitude faster than a byte loop.
pub(crate) fn is_all_zeroes(p: &[u8]) -> bool {
    debug_assert!(p.len() <= BUF_SIZE);
    p == &ZEROES[..p.len()]
}
