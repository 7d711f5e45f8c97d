use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::dirimage::DirImageOptions;
use crate::progress::ProgressUpdate;

/// Options shared by the transport operations.
#[derive(Clone)]
pub struct TransportOptions {
    /// Root of the local image layout.
    pub images_path: PathBuf,
    /// Re-pull even when the local copy matches the remote digest.
    pub force: bool,
    /// Advertise pushed layers as mountable from this reference, enabling
    /// the registry's cross-repo blob-mount shortcut.
    pub mounted_reference: Option<String>,
    /// Options threaded into every directory image operation.
    pub dirimage: DirImageOptions,
}

impl TransportOptions {
    pub fn new(images_path: impl Into<PathBuf>) -> TransportOptions {
        TransportOptions {
            images_path: images_path.into(),
            force: false,
            mounted_reference: None,
            dirimage: DirImageOptions::default(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_mounted_reference(mut self, reference: impl Into<String>) -> Self {
        self.mounted_reference = Some(reference.into());
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.dirimage.worker_count = worker_count;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: i64) -> Self {
        self.dirimage.chunk_size = chunk_size;
        self
    }

    pub fn with_progress_channel(mut self, sender: mpsc::Sender<ProgressUpdate>) -> Self {
        self.dirimage.progress = Some(sender);
        self
    }
}
