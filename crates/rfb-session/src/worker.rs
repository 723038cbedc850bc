use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TryRecvError};

use crate::config::SessionConfig;
use crate::credentials::{CredentialBroker, CredentialRequest, Credentials};
use crate::diagnostic::DiagnosticRecord;
use crate::dispatch::{FrameSlot, UpdateDispatcher};
use crate::engine::{EngineConnector, EngineError, EngineUpdate, Handshake, HandshakeDelegate, HandshakeParams, ProtocolEngine};
use crate::image::FramebufferSnapshot;
use crate::observer::LogLevel;
use crate::security::{SecurityNegotiationTrace, SecurityType};
use crate::session::{SessionState, SharedState};
use crate::{DesktopSize, SessionError, SessionErrorKind, SessionResult};

/// Worker to controller messages, delivered in queue order.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    SecurityNegotiationStarted {
        offered: Vec<SecurityType>,
        supported: Vec<SecurityType>,
    },
    SecurityTypeSelected(SecurityType),
    ServerReason(String),
    Log {
        level: LogLevel,
        message: String,
    },
    CredentialsRequired {
        request: CredentialRequest,
        reply: Sender<Option<Credentials>>,
    },
    Connected,
    Resize(DesktopSize),
    /// The snapshot itself waits in the slot, and may be replaced until delivered.
    FrameReady {
        slot: Arc<FrameSlot>,
        generation: u64,
    },
    Framebuffer(FramebufferSnapshot),
    Failure(DiagnosticRecord),
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum InputEvent {
    Key { keysym: u32, down: bool },
    Pointer { x: u16, y: u16, button_mask: u8 },
}

/// One connection attempt, from handshake to teardown.
pub(crate) struct Worker {
    pub(crate) connector: Arc<dyn EngineConnector>,
    pub(crate) config: SessionConfig,
    pub(crate) params: HandshakeParams,
    pub(crate) presets: Credentials,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) events: Sender<WorkerEvent>,
    pub(crate) inputs: Receiver<InputEvent>,
    pub(crate) cancel: Receiver<()>,
}

impl Worker {
    #[instrument(name = "session_worker", skip_all, fields(host = %self.params.host, port = self.params.port))]
    pub(crate) fn run(self) {
        let mut delegate = SessionDelegate {
            supported: &self.config.supported_security_types,
            shared: &self.shared,
            events: &self.events,
            cancel: &self.cancel,
            broker: CredentialBroker::new(
                self.presets.clone(),
                self.events.clone(),
                self.cancel.clone(),
                self.config.credential_timeout,
            ),
            trace: None,
            server_reason: None,
        };

        debug!("Begin handshake");

        let result = self
            .connector
            .handshake(&self.params, &mut delegate)
            .map_err(into_session_error);

        let SessionDelegate {
            trace, server_reason, ..
        } = delegate;

        match result {
            Ok(handshake) => self.run_connected(handshake, trace.as_ref(), server_reason.as_deref()),
            Err(_) if self.is_cancelled() => debug!("Handshake interrupted by disconnect"),
            Err(e) => self.fail(&e, trace.as_ref(), server_reason.as_deref()),
        }

        self.shared.set_state(SessionState::Disconnected);
        debug!("Worker terminated");
    }

    fn run_connected(
        &self,
        handshake: Handshake,
        trace: Option<&SecurityNegotiationTrace>,
        server_reason: Option<&str>,
    ) {
        let Handshake {
            mut engine,
            desktop_size,
            server_name,
        } = handshake;

        if self.is_cancelled() || !self.shared.advance(SessionState::Connected) {
            debug!("Disconnect requested during handshake");
            engine.close();
            return;
        }

        self.shared.set_screen_size(desktop_size);

        info!(
            %server_name,
            width = desktop_size.width,
            height = desktop_size.height,
            "Connected"
        );

        self.emit(WorkerEvent::Connected);

        let mut dispatcher = UpdateDispatcher::new(
            self.events.clone(),
            Arc::clone(&self.shared),
            self.config.coalesce_snapshots,
        );

        let result = self.active_session(engine.as_mut(), &mut dispatcher);

        engine.close();

        match result {
            Ok(()) => debug!("Active session ended by disconnect"),
            Err(_) if self.is_cancelled() => debug!("Active session interrupted by disconnect"),
            Err(e) => self.fail(&e, trace, server_reason),
        }

        self.emit(WorkerEvent::Disconnected);
    }

    fn active_session(&self, engine: &mut dyn ProtocolEngine, dispatcher: &mut UpdateDispatcher) -> SessionResult<()> {
        loop {
            if self.is_cancelled() {
                return Ok(());
            }

            for input in self.inputs.try_iter() {
                let sent = match input {
                    InputEvent::Key { keysym, down } => engine.send_key(keysym, down),
                    InputEvent::Pointer { x, y, button_mask } => engine.send_pointer(x, y, button_mask),
                };

                sent.map_err(into_session_error)?;
            }

            let update = engine
                .poll_update(self.config.poll_timeout)
                .map_err(into_session_error)?;

            match update {
                EngineUpdate::None => {}
                EngineUpdate::Resize(size) => {
                    info!(width = size.width, height = size.height, "Desktop resized");
                    dispatcher.resize(size)?;
                }
                EngineUpdate::FramebufferReady => dispatcher.framebuffer_ready(engine.current_pixels())?,
                EngineUpdate::Log { level, message } => forward_log(&self.events, level, message),
            }
        }
    }

    fn fail(&self, error: &SessionError, trace: Option<&SecurityNegotiationTrace>, server_reason: Option<&str>) {
        error!(error = %error.report(), "Session failed");

        self.shared.advance(SessionState::Failed);

        let record = DiagnosticRecord::from_error(error, trace, server_reason);
        debug!(%record, "Diagnostic");

        self.emit(WorkerEvent::Failure(record));
    }

    fn is_cancelled(&self) -> bool {
        is_cancelled(&self.cancel)
    }

    fn emit(&self, event: WorkerEvent) {
        emit(&self.events, event);
    }
}

/// Handshake callbacks, run on the worker thread.
struct SessionDelegate<'a> {
    supported: &'a [SecurityType],
    shared: &'a SharedState,
    events: &'a Sender<WorkerEvent>,
    cancel: &'a Receiver<()>,
    broker: CredentialBroker,
    trace: Option<SecurityNegotiationTrace>,
    server_reason: Option<String>,
}

impl HandshakeDelegate for SessionDelegate<'_> {
    fn select_security_type(&mut self, offered: &[SecurityType]) -> Option<SecurityType> {
        let trace = SecurityNegotiationTrace::negotiate(offered, self.supported);

        info!(%trace, "Security negotiation");

        for security_type in trace.unsupported_offers() {
            debug!(%security_type, "Skipping unsupported security type");
        }

        let selected = trace.selected();
        self.trace = Some(trace);

        emit(
            self.events,
            WorkerEvent::SecurityNegotiationStarted {
                offered: offered.to_vec(),
                supported: self.supported.to_vec(),
            },
        );

        if let Some(security_type) = selected {
            if security_type != SecurityType::NONE {
                self.shared.advance(SessionState::Authenticating);
            }

            emit(self.events, WorkerEvent::SecurityTypeSelected(security_type));
        }

        selected
    }

    fn request_credentials(&mut self, request: CredentialRequest) -> Option<Credentials> {
        self.shared.advance(SessionState::Authenticating);
        self.broker.request(request)
    }

    fn server_reason(&mut self, reason: &str) {
        warn!(reason, "Server reason");
        self.server_reason = Some(reason.to_owned());
        emit(self.events, WorkerEvent::ServerReason(reason.to_owned()));
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        forward_log(self.events, level, message.to_owned());
    }

    fn is_cancelled(&self) -> bool {
        is_cancelled(self.cancel)
    }
}

fn is_cancelled(cancel: &Receiver<()>) -> bool {
    matches!(cancel.try_recv(), Err(TryRecvError::Disconnected))
}

fn into_session_error(error: EngineError) -> SessionError {
    error.into_other_kind::<SessionErrorKind>()
}

fn forward_log(events: &Sender<WorkerEvent>, level: LogLevel, message: String) {
    match level {
        LogLevel::Trace => trace!(target: "rfb_engine", "{message}"),
        LogLevel::Debug => debug!(target: "rfb_engine", "{message}"),
        LogLevel::Info => info!(target: "rfb_engine", "{message}"),
        LogLevel::Warn => warn!(target: "rfb_engine", "{message}"),
        LogLevel::Error => error!(target: "rfb_engine", "{message}"),
    }

    emit(events, WorkerEvent::Log { level, message });
}

fn emit(events: &Sender<WorkerEvent>, event: WorkerEvent) {
    if events.send(event).is_err() {
        trace!("Controller is gone, event dropped");
    }
}
