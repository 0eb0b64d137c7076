use std::collections::VecDeque;

/// Identifies a slot of an [`EmitQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotId(u64);

struct Slot<T, S> {
    id: u64,
    release: Option<T>,
    error: Option<crate::Error>,
    stream: Option<S>,
}

/// What leaves the queue, in slot order.
pub(crate) enum Released<T, S> {
    Event(T),
    /// An error that hit a part while its slot was waiting, for the stream
    /// the slot was held for.
    Error(S, crate::Error),
}

/// FIFO of completion slots. A slot is held when a part starts and resolved
/// with its completion event whenever the part's sink is done; events leave
/// strictly in the order the slots were held.
pub(crate) struct EmitQueue<T, S> {
    next_id: u64,
    slots: VecDeque<Slot<T, S>>,
}

impl<T, S> EmitQueue<T, S> {
    pub(crate) fn new() -> EmitQueue<T, S> {
        EmitQueue {
            next_id: 0,
            slots: VecDeque::new(),
        }
    }

    /// Appends a pending slot. `stream` receives a deferred error, if any.
    pub(crate) fn hold(&mut self, stream: Option<S>) -> SlotId {
        let id = self.next_id;
        self.next_id += 1;

        self.slots.push_back(Slot {
            id,
            release: None,
            error: None,
            stream,
        });

        SlotId(id)
    }

    /// Sets the event of a slot and releases every resolved slot at the head.
    pub(crate) fn resolve(&mut self, slot: SlotId, event: T, out: &mut Vec<Released<T, S>>) {
        match self.slots.iter_mut().find(|s| s.id == slot.0) {
            Some(s) => s.release = Some(event),
            None => return,
        }

        self.flush(out);
    }

    /// Attaches `err` to a slot that has not been released yet. Returns
    /// `false` if the slot already left the queue.
    pub(crate) fn defer_error(&mut self, slot: SlotId, err: crate::Error) -> bool {
        match self.slots.iter_mut().find(|s| s.id == slot.0) {
            Some(s) => {
                s.error = Some(err);
                true
            }
            None => false,
        }
    }

    pub(crate) fn flush(&mut self, out: &mut Vec<Released<T, S>>) {
        while self.slots.front().map_or(false, |s| s.release.is_some()) {
            let Some(slot) = self.slots.pop_front() else {
                break;
            };

            if let Some(event) = slot.release {
                out.push(Released::Event(event));
            }

            if let (Some(err), Some(stream)) = (slot.error, slot.stream) {
                out.push(Released::Error(stream, err));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
