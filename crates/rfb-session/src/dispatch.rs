//! Update Dispatcher.
//!
//! Every framebuffer-ready notification is turned into an owned snapshot right away, since the
//! engine overwrites its buffer on the next poll cycle. Snapshots travel to the controller in
//! arrival order.
//!
//! With coalescing enabled, snapshots go through a single-entry slot instead of the event queue:
//! a `FrameReady` marker is queued only when the slot was empty, and a snapshot produced while
//! an earlier one is still waiting replaces it. Each resize bumps the slot generation, so that a
//! marker queued before a resize can never pick up a snapshot taken after it.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::channel::Sender;

use crate::image::{convert_to_snapshot, FramebufferSnapshot, PixelBuffer};
use crate::session::{SessionState, SharedState};
use crate::worker::WorkerEvent;
use crate::{DesktopSize, SessionResult};

#[derive(Debug, Default)]
pub(crate) struct FrameSlot {
    inner: Mutex<Option<(u64, FramebufferSnapshot)>>,
}

impl FrameSlot {
    /// Returns `true` when the slot was empty, i.e. when a marker must be queued.
    fn put(&self, generation: u64, snapshot: FramebufferSnapshot) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace((generation, snapshot)).is_none()
    }

    /// Takes the pending snapshot if it belongs to `generation`.
    pub(crate) fn take(&self, generation: u64) -> Option<FramebufferSnapshot> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match slot.as_ref() {
            Some((pending_generation, _)) if *pending_generation == generation => {
                slot.take().map(|(_, snapshot)| snapshot)
            }
            _ => None,
        }
    }

    fn take_any(&self) -> Option<FramebufferSnapshot> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take().map(|(_, snapshot)| snapshot)
    }
}

pub(crate) struct UpdateDispatcher {
    events: Sender<WorkerEvent>,
    shared: Arc<SharedState>,
    slot: Option<Arc<FrameSlot>>,
    generation: u64,
}

impl UpdateDispatcher {
    pub(crate) fn new(events: Sender<WorkerEvent>, shared: Arc<SharedState>, coalesce: bool) -> Self {
        Self {
            events,
            slot: coalesce.then(|| Arc::new(FrameSlot::default())),
            shared,
            generation: 0,
        }
    }

    /// Copies the current pixels and queues them for delivery.
    /// Nothing is counted nor delivered outside the `Connected` state.
    pub(crate) fn framebuffer_ready(&mut self, pixels: PixelBuffer<'_>) -> SessionResult<()> {
        let state = self.shared.state();

        if state != SessionState::Connected {
            trace!(%state, "Framebuffer update ignored");
            return Ok(());
        }

        if pixels.size != self.shared.screen_size() {
            debug!(width = pixels.size.width, height = pixels.size.height, "Implicit resize");
            self.resize(pixels.size)?;
        }

        let snapshot = convert_to_snapshot(pixels)?;
        let count = self.shared.increment_update_count();

        trace!(count, width = snapshot.width(), height = snapshot.height(), "Framebuffer snapshot");

        match &self.slot {
            Some(slot) => {
                if slot.put(self.generation, snapshot) {
                    self.send(WorkerEvent::FrameReady {
                        slot: Arc::clone(slot),
                        generation: self.generation,
                    })?;
                }
            }
            None => self.send(WorkerEvent::Framebuffer(snapshot))?,
        }

        Ok(())
    }

    /// Queues a resize, after any snapshot taken at the previous size.
    pub(crate) fn resize(&mut self, size: DesktopSize) -> SessionResult<()> {
        if let Some(slot) = &self.slot {
            if let Some(pending) = slot.take_any() {
                self.send(WorkerEvent::Framebuffer(pending))?;
            }
        }

        self.generation += 1;
        self.shared.set_screen_size(size);

        self.send(WorkerEvent::Resize(size))
    }

    fn send(&self, event: WorkerEvent) -> SessionResult<()> {
        self.events
            .send(event)
            .map_err(|_| general_err!("controller event queue is closed"))
    }
}
