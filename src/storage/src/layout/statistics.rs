use std::sync::atomic::{AtomicI64, Ordering};

/// Aggregate byte counters for a layout mapper. Every field is an atomic
/// so updates from concurrent workers stay lock-free.
#[derive(Debug, Default)]
pub struct Statistics {
    pub source_bytes: AtomicI64,
    pub bytes_written: AtomicI64,
    pub bytes_skipped: AtomicI64,
    pub bytes_read: AtomicI64,
    pub bytes_cloned: AtomicI64,
    pub matched_segments: AtomicI64,
}

/// A point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub source_bytes: i64,
    pub bytes_written: i64,
    pub bytes_skipped: i64,
    pub bytes_read: i64,
    pub bytes_cloned: i64,
    pub matched_segments: i64,
}

impl Statistics {
    /// Fold a snapshot's values into these counters.
    pub fn add(&self, delta: &StatisticsSnapshot) {
        self.source_bytes.fetch_add(delta.source_bytes, Ordering::Relaxed);
        self.bytes_written.fetch_add(delta.bytes_written, Ordering::Relaxed);
        self.bytes_skipped.fetch_add(delta.bytes_skipped, Ordering::Relaxed);
        self.bytes_read.fetch_add(delta.bytes_read, Ordering::Relaxed);
        self.bytes_cloned.fetch_add(delta.bytes_cloned, Ordering::Relaxed);
        self.matched_segments.fetch_add(delta.matched_segments, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.source_bytes.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.bytes_skipped.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_cloned.store(0, Ordering::Relaxed);
        self.matched_segments.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            source_bytes: self.source_bytes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_skipped: self.bytes_skipped.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_cloned: self.bytes_cloned.load(Ordering::Relaxed),
            matched_segments: self.matched_segments.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Statistics:")?;
        writeln!(f, "SourceBytes: {}", self.source_bytes)?;
        writeln!(f, "BytesWritten: {}", self.bytes_written)?;
        writeln!(f, "BytesSkipped: {}", self.bytes_skipped)?;
        writeln!(f, "BytesRead: {}", self.bytes_read)?;
        writeln!(f, "BytesCloned: {}", self.bytes_cloned)?;
        writeln!(f, "MatchedSegments: {}", self.matched_segments)
    }
}
