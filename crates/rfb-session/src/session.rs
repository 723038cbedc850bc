use core::cell::{Cell, RefCell};
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use core::time::Duration;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::{Destination, SessionConfig};
use crate::credentials::{answer_request, Credentials};
use crate::engine::{EngineConnector, HandshakeParams};
use crate::observer::SessionObserver;
use crate::worker::{InputEvent, Worker, WorkerEvent};
use crate::{DesktopSize, SessionError, SessionErrorExt as _, SessionResult};

/// Lifecycle state of a [`VncSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Disconnecting,
    /// Transient: a fatal error is being reported, `Disconnected` follows.
    Failed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Failed => "Failed",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Authenticating => 2,
            Self::Connected => 3,
            Self::Disconnecting => 4,
            Self::Failed => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Connected,
            4 => Self::Disconnecting,
            5 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-connection fields readable from the controller while the worker mutates them.
#[derive(Debug)]
pub(crate) struct SharedState {
    state: AtomicU8,
    /// Width in the high half, height in the low half.
    screen_size: AtomicU32,
    update_count: AtomicU64,
}

impl SharedState {
    fn new(state: SessionState, update_count: u64) -> Self {
        Self {
            state: AtomicU8::new(state.as_u8()),
            screen_size: AtomicU32::new(0),
            update_count: AtomicU64::new(update_count),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = SessionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        debug!(from = previous.name(), to = state.name(), "Session state transition");
    }

    /// Moves to `state` unless a teardown has started.
    pub(crate) fn advance(&self, state: SessionState) -> bool {
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let torn_down = matches!(
                SessionState::from_u8(current),
                SessionState::Disconnecting | SessionState::Disconnected
            );
            (!torn_down).then_some(state.as_u8())
        });

        match result {
            Ok(previous) => {
                debug!(
                    from = SessionState::from_u8(previous).name(),
                    to = state.name(),
                    "Session state transition"
                );
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn screen_size(&self) -> DesktopSize {
        let packed = self.screen_size.load(Ordering::Acquire);
        DesktopSize {
            width: u16::try_from(packed >> 16).unwrap_or(u16::MAX),
            height: u16::try_from(packed & 0xFFFF).unwrap_or(u16::MAX),
        }
    }

    pub(crate) fn set_screen_size(&self, size: DesktopSize) {
        let packed = (u32::from(size.width) << 16) | u32::from(size.height);
        self.screen_size.store(packed, Ordering::Release);
    }

    pub(crate) fn increment_update_count(&self) -> u64 {
        self.update_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Acquire)
    }
}

/// Controller side of one connection attempt.
struct WorkerLink {
    handle: JoinHandle<()>,
    inputs: Sender<InputEvent>,
    /// Never sends anything; dropping it interrupts the worker.
    cancel: Sender<()>,
    events: Receiver<WorkerEvent>,
    shared: Arc<SharedState>,
}

/// Controller handle of a single VNC connection.
///
/// The handle is meant to stay on the controller thread (typically the UI thread): observer
/// callbacks only ever run inside [`VncSession::dispatch_events`] and
/// [`VncSession::wait_and_dispatch`], one at a time.
///
/// Every connection attempt gets its own worker, event queue and shared state. A worker torn
/// down in the middle of its handshake is detached rather than joined, so that `disconnect`
/// never waits on the network; whatever it produces afterwards is discarded.
pub struct VncSession {
    connector: Arc<dyn EngineConnector>,
    config: SessionConfig,
    observer: Weak<dyn SessionObserver>,
    shared: RefCell<Arc<SharedState>>,
    link: RefCell<Option<WorkerLink>>,
    /// Events left over by torn-down connections, delivered before anything newer.
    backlog: RefCell<VecDeque<WorkerEvent>>,
    detached: RefCell<Vec<JoinHandle<()>>>,
    dispatching: Cell<bool>,
}

impl VncSession {
    /// The session does not extend the observer’s lifetime.
    pub fn new(
        connector: Arc<dyn EngineConnector>,
        config: SessionConfig,
        observer: &Rc<dyn SessionObserver>,
    ) -> Self {
        Self {
            connector,
            config,
            observer: Rc::downgrade(observer),
            shared: RefCell::new(Arc::new(SharedState::new(SessionState::Disconnected, 0))),
            link: RefCell::new(None),
            backlog: RefCell::new(VecDeque::new()),
            detached: RefCell::new(Vec::new()),
            dispatching: Cell::new(false),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts a connection attempt in the background.
    ///
    /// `Ok` means the attempt was accepted; success or failure is reported through the observer.
    /// Fails with `InvalidState` unless the session is `Disconnected`, and with `InvalidArgument`
    /// for an empty host or port zero.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> SessionResult<()> {
        let host = host.trim();

        if host.is_empty() {
            return Err(SessionError::invalid_argument("empty host"));
        }

        if port == 0 {
            return Err(SessionError::invalid_argument("port zero"));
        }

        let current = self.state();

        if current != SessionState::Disconnected {
            return Err(SessionError::invalid_state("connect", current));
        }

        // The previous worker, if any, reached its end.
        if let Some(link) = self.link.borrow_mut().take() {
            self.release(link, true);
        }

        self.reap_detached();

        let previous_count = self.shared.borrow().update_count();
        let shared = Arc::new(SharedState::new(SessionState::Connecting, previous_count));
        debug!(from = "Disconnected", to = "Connecting", "Session state transition");

        let (events_tx, events_rx) = channel::unbounded();
        let (inputs_tx, inputs_rx) = channel::unbounded();
        let (cancel_tx, cancel_rx) = channel::bounded(0);

        let worker = Worker {
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            params: HandshakeParams {
                host: host.to_owned(),
                port,
                shared: self.config.shared,
            },
            presets: Credentials::new(username, password),
            shared: Arc::clone(&shared),
            events: events_tx,
            inputs: inputs_rx,
            cancel: cancel_rx,
        };

        let handle = std::thread::Builder::new()
            .name("rfb-session-worker".to_owned())
            .spawn(move || worker.run())
            .map_err(|e| custom_err!("spawn session worker", e))?;

        info!(host, port, "Connection attempt started");

        *self.shared.borrow_mut() = Arc::clone(&shared);
        *self.link.borrow_mut() = Some(WorkerLink {
            handle,
            inputs: inputs_tx,
            cancel: cancel_tx,
            events: events_rx,
            shared,
        });

        Ok(())
    }

    pub fn connect_to(
        &self,
        destination: &Destination,
        username: Option<String>,
        password: Option<String>,
    ) -> SessionResult<()> {
        self.connect(destination.name(), destination.port(), username, password)
    }

    /// Tears the connection down; a no-op when already disconnected.
    ///
    /// Returns without waiting on the network: a connected worker is joined (it notices the
    /// teardown within one poll timeout), a worker still in its handshake is detached. Pending
    /// events, including the disconnect callback, are then dispatched. A pending credential
    /// request is abandoned without prompting the observer.
    pub fn disconnect(&self) {
        let link = self.link.borrow_mut().take();

        let Some(link) = link else {
            return;
        };

        let state = link.shared.state();

        if state == SessionState::Disconnected {
            // The worker terminated on its own.
            self.release(link, true);
            return;
        }

        link.shared.set_state(SessionState::Disconnecting);

        let shared = Arc::clone(&link.shared);
        self.release(link, matches!(state, SessionState::Connected | SessionState::Failed));

        shared.set_state(SessionState::Disconnected);
        info!("Disconnected");

        self.dispatch_events();
    }

    /// Dropped silently unless connected.
    pub fn send_key_event(&self, keysym: u32, down: bool) {
        self.send_input(InputEvent::Key { keysym, down });
    }

    /// Dropped silently unless connected.
    pub fn send_pointer_event(&self, x: u16, y: u16, button_mask: u8) {
        self.send_input(InputEvent::Pointer { x, y, button_mask });
    }

    fn send_input(&self, event: InputEvent) {
        if self.state() != SessionState::Connected {
            trace!(?event, "Input dropped, not connected");
            return;
        }

        if let Some(link) = self.link.borrow().as_ref() {
            if link.inputs.send(event).is_err() {
                trace!("Input dropped, worker is gone");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.borrow().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn screen_size(&self) -> DesktopSize {
        self.shared.borrow().screen_size()
    }

    pub fn framebuffer_update_count(&self) -> u64 {
        self.shared.borrow().update_count()
    }

    /// Delivers every pending event to the observer; returns how many were processed.
    ///
    /// Calls made from within an observer callback return immediately, the outer call keeps
    /// draining the queue.
    pub fn dispatch_events(&self) -> usize {
        let Some(_guard) = DispatchGuard::enter(&self.dispatching) else {
            return 0;
        };

        let mut count = 0;

        while let Some((event, origin)) = self.next_event() {
            self.deliver(event, origin);
            count += 1;
        }

        count
    }

    /// Waits up to `timeout` for the next event, then delivers everything pending.
    pub fn wait_and_dispatch(&self, timeout: Duration) -> usize {
        if self.dispatching.get() {
            return 0;
        }

        if !self.backlog.borrow().is_empty() {
            return self.dispatch_events();
        }

        let deadline = Instant::now() + timeout;
        let events = self.link.borrow().as_ref().map(|link| link.events.clone());
        let events = events.unwrap_or_else(channel::never);

        match events.recv_deadline(deadline) {
            Ok(event) => {
                {
                    let Some(_guard) = DispatchGuard::enter(&self.dispatching) else {
                        return 0;
                    };
                    self.deliver(event, Origin::Live);
                }
                1 + self.dispatch_events()
            }
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                // The worker is gone and its queue is drained.
                let _ = channel::never::<()>().recv_deadline(deadline);
                0
            }
        }
    }

    fn next_event(&self) -> Option<(WorkerEvent, Origin)> {
        if let Some(event) = self.backlog.borrow_mut().pop_front() {
            return Some((event, Origin::TornDown));
        }

        let link = self.link.borrow();
        let event = link.as_ref()?.events.try_recv().ok()?;

        Some((event, Origin::Live))
    }

    fn deliver(&self, event: WorkerEvent, origin: Origin) {
        let observer = self.observer.upgrade();

        if let WorkerEvent::CredentialsRequired { request, reply } = event {
            // Nobody is waiting for an answer anymore.
            if origin == Origin::TornDown || self.state() != SessionState::Authenticating {
                debug!("Abandoned credential request discarded");
                return;
            }

            let answer = observer
                .as_deref()
                .and_then(|observer| answer_request(observer, &request));

            if reply.send(answer).is_err() {
                debug!("Credential answer arrived after the request was abandoned");
            }

            return;
        }

        let Some(observer) = observer else {
            trace!("Observer is gone, event discarded");
            return;
        };

        match event {
            WorkerEvent::SecurityNegotiationStarted { offered, supported } => {
                observer.on_security_negotiation_started(&offered, &supported);
            }
            WorkerEvent::SecurityTypeSelected(security_type) => observer.on_security_type_selected(security_type),
            WorkerEvent::ServerReason(reason) => observer.on_server_reason_message(&reason),
            WorkerEvent::Log { level, message } => observer.on_log_message(&message, level),
            WorkerEvent::Connected => observer.on_connect(),
            WorkerEvent::Resize(size) => observer.on_resize(size.width, size.height),
            WorkerEvent::FrameReady { slot, generation } => {
                if let Some(snapshot) = slot.take(generation) {
                    observer.on_framebuffer_update(snapshot);
                }
            }
            WorkerEvent::Framebuffer(snapshot) => observer.on_framebuffer_update(snapshot),
            WorkerEvent::Failure(record) => record.deliver(&*observer),
            WorkerEvent::Disconnected => observer.on_disconnect(),
            WorkerEvent::CredentialsRequired { .. } => {}
        }
    }

    /// Interrupts the worker of `link` and keeps its queued events for delivery.
    ///
    /// With `join` unset, a worker that has not terminated yet is detached.
    fn release(&self, link: WorkerLink, join: bool) {
        let WorkerLink {
            handle,
            inputs,
            cancel,
            events,
            shared: _,
        } = link;

        drop(cancel);
        drop(inputs);

        if join || handle.is_finished() {
            join_worker(handle);
        } else {
            debug!("Worker still in handshake, detached");
            self.detached.borrow_mut().push(handle);
        }

        // Anything sent after this point is discarded along with the receiver.
        self.backlog.borrow_mut().extend(events.try_iter());
    }

    /// Joins the detached workers that have terminated since.
    fn reap_detached(&self) {
        let mut detached = self.detached.borrow_mut();
        let (finished, running): (Vec<_>, Vec<_>) = detached.drain(..).partition(JoinHandle::is_finished);

        finished.into_iter().for_each(join_worker);
        *detached = running;
    }
}

impl Drop for VncSession {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            let join = link.shared.state() == SessionState::Connected;
            self.release(link, join);
        }

        self.reap_detached();

        let running = self.detached.get_mut().len();

        if running != 0 {
            debug!(running, "Leaving workers blocked in their handshake behind");
        }
    }
}

impl fmt::Debug for VncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VncSession")
            .field("state", &self.state())
            .field("screen_size", &self.screen_size())
            .field("update_count", &self.framebuffer_update_count())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Live,
    /// Queued by a connection that has since been torn down.
    TornDown,
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("Session worker panicked");
    }
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl<'a> DispatchGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
