use tokio::sync::mpsc;

use crate::progress::ProgressUpdate;

/// Default segment size: 64 MiB.
const DEFAULT_CHUNK_SIZE: i64 = 64 * 1024 * 1024;

/// Options for reading and writing directory images.
#[derive(Clone)]
pub struct DirImageOptions {
    /// Segment size used when splitting files.
    pub chunk_size: i64,
    /// Bounded worker pool size for hashing and segment writes.
    pub worker_count: usize,
    /// Read manifest/config only; layers refuse body access.
    pub omit_layer_content: bool,
    /// Retries per segment on connection-reset / broken-pipe errors.
    pub network_failure_retry_count: usize,
    /// Progress updates are sent here with a non-blocking send.
    pub progress: Option<mpsc::Sender<ProgressUpdate>>,
}

impl Default for DirImageOptions {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        DirImageOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_count: cpus.min(8),
            omit_layer_content: false,
            network_failure_retry_count: 3,
            progress: None,
        }
    }
}

impl DirImageOptions {
    pub fn with_chunk_size(mut self, chunk_size: i64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_omit_layer_content(mut self, omit: bool) -> Self {
        self.omit_layer_content = omit;
        self
    }

    pub fn with_network_failure_retry_count(mut self, count: usize) -> Self {
        self.network_failure_retry_count = count;
        self
    }

    pub fn with_progress_channel(mut self, sender: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }
}
