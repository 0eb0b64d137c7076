use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::header::HeaderMap;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::SINK_CHANNEL_CAPACITY;
use crate::helpers;
use crate::queue::SlotId;
use crate::state::{OpenedFile, Shared};
use crate::{Event, PartHead};

/// A part with a file name, stored under
/// [`Options::upload_dir`](crate::Options::upload_dir).
///
/// Reported as [`Event::File`](crate::Event::File) when
/// [`Options::auto_files`](crate::Options::auto_files) is enabled. The file
/// is left in place once the request completes; removing it is up to the
/// caller.
#[derive(Debug, Clone)]
pub struct File {
    field_name: Option<String>,
    original_filename: String,
    path: PathBuf,
    headers: HeaderMap,
    size: u64,
}

impl File {
    /// The `name` parameter of the part's `Content-Disposition` header.
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// The file name sent by the client, without any directory.
    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    /// Where the file has been stored.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The number of bytes written.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// The driver's end of an upload: body bytes are handed to a task that owns
/// the file.
pub(crate) struct FileSink {
    tx: mpsc::Sender<Bytes>,
}

impl FileSink {
    pub(crate) fn spawn(shared: &Shared, slot: SlotId, head: &PartHead, upload_dir: &Path) -> FileSink {
        let original_filename = head.file_name.clone().unwrap_or_default();
        let (tx, rx) = mpsc::channel(SINK_CHANNEL_CAPACITY);

        let upload = Upload {
            shared: shared.clone(),
            slot,
            cancel: CancellationToken::new(),
            rx,
            file: File {
                field_name: head.name.clone(),
                path: helpers::upload_path(upload_dir, &original_filename),
                original_filename,
                headers: head.headers.clone(),
                size: 0,
            },
        };

        shared.runtime().spawn(upload.run());

        FileSink { tx }
    }

    /// Waits for room in the upload's buffer. Bytes for an upload that has
    /// already given up are dropped.
    pub(crate) async fn push(&self, data: Bytes) {
        let _ = self.tx.send(data).await;
    }

    /// Closes the upload's buffer to signal the end of the body. The upload
    /// completes on its own.
    pub(crate) fn finish(self) {
        drop(self.tx);
    }
}

struct Upload {
    shared: Shared,
    slot: SlotId,
    cancel: CancellationToken,
    rx: mpsc::Receiver<Bytes>,
    file: File,
}

impl Upload {
    async fn run(mut self) {
        let cancel = self.cancel.clone();

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            written = self.write() => written,
        };

        match written {
            Ok(Some(size)) => {
                trace!("stored {} bytes in {}", size, self.file.path.display());
                self.file.size = size;
                self.shared.resolve(self.slot, Event::File(self.file));
                self.shared.end_flush();
            }
            Ok(None) => {}
            Err(err) => self.shared.handle_error(err),
        }
    }

    /// Writes the body to a new file. Returns `None` if the request failed
    /// before the file could be registered.
    async fn write(&mut self) -> crate::Result<Option<u64>> {
        let path = self.file.path.clone();

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| crate::Error::CreateFileFailed {
                path: path.clone(),
                cause: Arc::new(err),
            })?;

        let registered = self.shared.register_file(OpenedFile {
            path: path.clone(),
            cancel: self.cancel.clone(),
        });

        if !registered {
            drop(file);
            self.shared.remove_file(path);
            return Ok(None);
        }

        trace!("writing upload to {}", path.display());

        let write_failed = |err: std::io::Error| crate::Error::WriteFileFailed {
            path: path.clone(),
            cause: Arc::new(err),
        };

        let mut size = 0;
        while let Some(data) = self.rx.recv().await {
            self.shared.reserve_file_bytes(data.len() as u64)?;
            file.write_all(&data).await.map_err(write_failed)?;
            size += data.len() as u64;
        }

        file.flush().await.map_err(write_failed)?;

        Ok(Some(size))
    }
}
