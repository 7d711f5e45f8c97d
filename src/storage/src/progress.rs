//! Transfer progress reporting.
//!
//! Workers send [`ProgressUpdate`] values over a bounded channel with a
//! non-blocking send (updates are dropped when the channel is full rather
//! than stalling a transfer). [`render`] consumes the channel and draws a
//! braille progress bar.

use std::io::Write;

use tokio::sync::mpsc;

use crate::bitarray::BitArray;

/// One progress observation for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_processed: i64,
    pub bytes_total: i64,
}

/// Width of the bar in bits; eight bits per braille cell.
const BAR_SIZE: i64 = 800;

/// Consume progress updates and render a single-line bar into `out` until
/// the channel closes.
pub async fn render<W: Write>(
    mut updates: mpsc::Receiver<ProgressUpdate>,
    out: &mut W,
) -> std::io::Result<()> {
    let mut bar = BitArray::new(BAR_SIZE as usize);
    let mut last: i64 = -1;
    while let Some(update) = updates.recv().await {
        if update.bytes_total <= 0 {
            continue;
        }
        let current = (BAR_SIZE * update.bytes_processed / update.bytes_total).clamp(0, BAR_SIZE);
        if current != last {
            bar.fill(current as usize);
            write!(out, "\rProgress: {} {}%", bar, current / 8)?;
            out.flush()?;
        }
        last = current;
    }
    writeln!(out)?;
    Ok(())
}
