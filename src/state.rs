use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use spin::mutex::spin::SpinMutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::queue::{EmitQueue, Released, SlotId};
use crate::Event;

pub(crate) type PartSender = mpsc::Sender<crate::Result<Bytes>>;

/// A file written under the upload directory. It stays registered until the
/// request is over so that a late error can still remove it.
pub(crate) struct OpenedFile {
    pub(crate) path: PathBuf,
    pub(crate) cancel: CancellationToken,
}

struct CurrentPart {
    slot: SlotId,
    stream: Option<PartSender>,
}

pub(crate) struct FormState {
    error: Option<crate::Error>,
    queue: EmitQueue<Event, PartSender>,
    flushing: usize,
    current: Option<CurrentPart>,
    opened_files: Vec<OpenedFile>,
    total_field_size: u64,
    total_file_size: u64,
    max_fields_size: u64,
    max_files_size: u64,
    closed: bool,
}

struct Inner {
    state: SpinMutex<FormState>,
    events: mpsc::UnboundedSender<Event>,
    done: CancellationToken,
    runtime: Handle,
}

/// Sends events while the state is locked, so that events released by
/// different tasks reach the receiver in release order. Events that could not
/// be delivered are dropped only after the lock is gone, since dropping a
/// [`Part`](crate::Part) takes the lock again.
struct Outbox<'a> {
    events: &'a mpsc::UnboundedSender<Event>,
    runtime: &'a Handle,
    undelivered: Vec<Event>,
}

impl Outbox<'_> {
    fn send(&mut self, event: Event) {
        if let Err(err) = self.events.send(event) {
            self.undelivered.push(err.0);
        }
    }

    fn discard(&mut self, event: Event) {
        self.undelivered.push(event);
    }

    fn part_error(&mut self, stream: PartSender, err: crate::Error) {
        match stream.try_send(Err(err)) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(item)) => {
                self.runtime.spawn(async move {
                    let _ = stream.send(item).await;
                });
            }
        }
    }

    fn dispatch(&mut self, released: Vec<Released<Event, PartSender>>) {
        for item in released {
            match item {
                Released::Event(event) => self.send(event),
                Released::Error(stream, err) => self.part_error(stream, err),
            }
        }
    }
}

/// Per-request state shared by the driver, the file sinks and the parts
/// handed to the caller.
///
/// The [`Events`](crate::Events) stream ends once every clone is gone.
#[derive(Clone)]
pub(crate) struct Shared {
    inner: Arc<Inner>,
}

/// Held by [`Part`](crate::Part)s, which must not keep the request alive.
#[derive(Clone)]
pub(crate) struct WeakShared {
    inner: Weak<Inner>,
}

impl WeakShared {
    #[cfg(test)]
    pub(crate) fn dangling() -> WeakShared {
        WeakShared { inner: Weak::new() }
    }

    pub(crate) fn end_flush(&self) {
        if let Some(inner) = self.inner.upgrade() {
            Shared { inner }.end_flush();
        }
    }
}

impl Shared {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<Event>,
        max_fields_size: u64,
        max_files_size: u64,
        runtime: Handle,
    ) -> Shared {
        let state = FormState {
            error: None,
            queue: EmitQueue::new(),
            flushing: 0,
            current: None,
            opened_files: Vec::new(),
            total_field_size: 0,
            total_file_size: 0,
            max_fields_size,
            max_files_size,
            closed: false,
        };

        Shared {
            inner: Arc::new(Inner {
                state: SpinMutex::new(state),
                events,
                done: CancellationToken::new(),
                runtime,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakShared {
        WeakShared {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn locked<R>(&self, f: impl FnOnce(&mut FormState, &mut Outbox<'_>) -> R) -> R {
        let mut outbox = Outbox {
            events: &self.inner.events,
            runtime: &self.inner.runtime,
            undelivered: Vec::new(),
        };

        let result = {
            let mut state = self.inner.state.lock();
            f(&mut state, &mut outbox)
        };

        drop(outbox);
        result
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Cancelled once the request has closed or failed.
    pub(crate) fn done(&self) -> CancellationToken {
        self.inner.done.clone()
    }

    pub(crate) fn has_error(&self) -> bool {
        self.inner.state.lock().error.is_some()
    }

    /// Emits an event that is not subject to part ordering.
    pub(crate) fn emit(&self, event: Event) {
        self.locked(|_, outbox| outbox.send(event));
    }

    /// Starts a part: holds its completion slot and counts it as outstanding.
    pub(crate) fn begin_part(&self, stream: Option<PartSender>) -> SlotId {
        self.locked(|state, _| {
            state.flushing += 1;
            let slot = state.queue.hold(stream.clone());
            state.current = Some(CurrentPart { slot, stream });
            slot
        })
    }

    /// The scanner has left the current part.
    pub(crate) fn end_part(&self) {
        self.locked(|state, _| state.current = None);
    }

    /// Completes a slot. Completions after an error are dropped.
    pub(crate) fn resolve(&self, slot: SlotId, event: Event) {
        self.locked(|state, outbox| {
            if state.error.is_some() {
                outbox.discard(event);
                return;
            }

            let mut released = Vec::new();
            state.queue.resolve(slot, event, &mut released);
            outbox.dispatch(released);
        });
    }

    pub(crate) fn begin_flush(&self) {
        self.locked(|state, _| state.flushing += 1);
    }

    pub(crate) fn end_flush(&self) {
        let underflow = self.locked(|state, outbox| {
            if state.flushing == 0 {
                return true;
            }

            state.flushing -= 1;
            state.maybe_close(outbox, &self.inner.done);
            false
        });

        if underflow {
            self.handle_error(crate::Error::InvalidState("unexpected end of flush"));
        }
    }

    /// Counts `len` more field bytes, refusing them if they would exceed the
    /// limit.
    pub(crate) fn reserve_field_bytes(&self, len: u64) -> crate::Result<()> {
        self.locked(|state, _| {
            let total = state.total_field_size.saturating_add(len);
            if total > state.max_fields_size {
                return Err(crate::Error::FieldsSizeExceeded {
                    limit: state.max_fields_size,
                });
            }
            state.total_field_size = total;
            Ok(())
        })
    }

    /// Counts `len` more file bytes, refusing them if they would exceed the
    /// limit shared by all files of the request.
    pub(crate) fn reserve_file_bytes(&self, len: u64) -> crate::Result<()> {
        self.locked(|state, _| {
            let total = state.total_file_size.saturating_add(len);
            if total > state.max_files_size {
                return Err(crate::Error::FilesSizeExceeded {
                    limit: state.max_files_size,
                });
            }
            state.total_file_size = total;
            Ok(())
        })
    }

    /// Registers a created upload. Returns `false` if the request has already
    /// failed, in which case the caller must remove the file itself.
    pub(crate) fn register_file(&self, file: OpenedFile) -> bool {
        self.locked(|state, _| {
            if state.error.is_some() {
                return false;
            }
            state.opened_files.push(file);
            true
        })
    }

    /// Records an error. Only the first one is reported; every call removes
    /// the uploads registered so far.
    pub(crate) fn handle_error(&self, err: crate::Error) {
        let files = self.locked(|state, outbox| {
            let first = state.error.is_none();

            if first {
                trace!("request failed: {}", err);
                state.error = Some(err.clone());

                if let Some(current) = &state.current {
                    if !state.queue.defer_error(current.slot, err.clone()) {
                        if let Some(stream) = &current.stream {
                            outbox.part_error(stream.clone(), err.clone());
                        }
                    }
                }

                outbox.send(Event::Error(err));
                self.inner.done.cancel();
            }

            std::mem::take(&mut state.opened_files)
        });

        for file in files {
            file.cancel.cancel();
            self.remove_file(file.path);
        }
    }

    /// Removes an upload in the background, reporting a failure as
    /// [`Event::CleanupFailed`].
    pub(crate) fn remove_file(&self, path: PathBuf) {
        let shared = self.clone();

        self.inner.runtime.spawn(async move {
            trace!("removing {}", path.display());

            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!("failed to remove {}: {}", path.display(), err);
                shared.emit(Event::CleanupFailed(crate::Error::RemoveFileFailed {
                    path,
                    cause: Arc::new(err),
                }));
            }
        });
    }
}

impl FormState {
    fn maybe_close(&mut self, outbox: &mut Outbox<'_>, done: &CancellationToken) {
        if self.flushing > 0 || self.error.is_some() || self.closed {
            return;
        }

        self.closed = true;

        let mut released = Vec::new();
        let slot = self.queue.hold(None);
        self.queue.resolve(slot, Event::Close, &mut released);
        outbox.dispatch(released);

        done.cancel();
    }
}
