//! Scripted protocol engine and recording observer shared by the integration tests.

use core::cell::RefCell;
use core::time::Duration;
use std::collections::VecDeque;
use std::net::TcpStream;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rfb_session::{
    CredentialRequest, CredentialScheme, Credentials, DesktopSize, EngineConnector, EngineError, EngineErrorExt as _,
    EngineErrorKind, EngineResult, EngineUpdate, FramebufferSnapshot, Handshake, HandshakeDelegate, HandshakeParams,
    LogLevel, PixelBuffer, PixelFormat, ProtocolEngine, SecurityType, SessionConfig, SessionObserver, SessionState,
    VncSession,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Installs a test-friendly subscriber, configured through `RFB_LOG`.
pub fn init_logging() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("RFB_LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

/// What the scripted server does during the handshake.
#[derive(Debug, Clone)]
pub struct ServerScript {
    pub offered: Vec<SecurityType>,
    /// Expected username, only checked when set.
    pub username: Option<String>,
    pub password: Option<String>,
    pub desktop_size: DesktopSize,
    pub server_name: String,
    pub format: PixelFormat,
    /// Opens a real TCP connection first, so transport errors come from the OS.
    pub dial: bool,
    /// Engine log lines emitted before security negotiation.
    pub logs: Vec<(LogLevel, String)>,
    pub rejection_reason: String,
    /// Time spent waiting on a silent server before the security handshake.
    pub stall: Duration,
    /// Whether the stall ends early once the session is torn down.
    pub stall_honours_cancel: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            offered: vec![SecurityType::NONE],
            username: None,
            password: None,
            desktop_size: DesktopSize::new(64, 32),
            server_name: "scripted desktop".to_owned(),
            format: PixelFormat::RGBX32,
            dial: false,
            logs: Vec::new(),
            rejection_reason: "Authentication failure".to_owned(),
            stall: Duration::ZERO,
            stall_honours_cancel: true,
        }
    }
}

/// One poll cycle of the scripted engine.
#[derive(Debug, Clone)]
pub enum Step {
    /// Paints the whole buffer with an RGB colour, then reports a framebuffer update.
    Fill([u8; 3]),
    /// Like `Fill`, for an update that takes a while to arrive.
    DelayedFill(Duration, [u8; 3]),
    Resize(DesktopSize),
    Log(LogLevel, String),
    /// Fails with a protocol violation.
    Fail(String),
    /// The server closes the connection.
    Close,
}

#[derive(Debug, Default)]
struct EngineState {
    steps: VecDeque<Step>,
    keys: Vec<(u32, bool)>,
    pointers: Vec<(u16, u16, u8)>,
    handshakes: Vec<HandshakeParams>,
    credentials: Vec<Credentials>,
    close_count: usize,
    finished_handshakes: usize,
}

/// Test-side view of the scripted engine, shared across connections.
#[derive(Debug, Clone, Default)]
pub struct EngineHandle(Arc<Mutex<EngineState>>);

impl EngineHandle {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, step: Step) {
        self.lock().steps.push_back(step);
    }

    pub fn push_all(&self, steps: impl IntoIterator<Item = Step>) {
        self.lock().steps.extend(steps);
    }

    pub fn is_drained(&self) -> bool {
        self.lock().steps.is_empty()
    }

    pub fn keys(&self) -> Vec<(u32, bool)> {
        self.lock().keys.clone()
    }

    pub fn pointers(&self) -> Vec<(u16, u16, u8)> {
        self.lock().pointers.clone()
    }

    pub fn handshakes(&self) -> Vec<HandshakeParams> {
        self.lock().handshakes.clone()
    }

    /// Credentials the server received, one entry per authentication.
    pub fn received_credentials(&self) -> Vec<Credentials> {
        self.lock().credentials.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Handshakes that returned, successfully or not.
    pub fn finished_handshakes(&self) -> usize {
        self.lock().finished_handshakes
    }
}

#[derive(Debug)]
pub struct ScriptedConnector {
    script: ServerScript,
    handle: EngineHandle,
}

impl ScriptedConnector {
    pub fn new(script: ServerScript) -> (Arc<Self>, EngineHandle) {
        let handle = EngineHandle::default();

        let connector = Arc::new(Self {
            script,
            handle: handle.clone(),
        });

        (connector, handle)
    }

    fn authenticate(&self, selected: SecurityType, delegate: &mut dyn HandshakeDelegate) -> EngineResult<()> {
        if selected == SecurityType::NONE {
            return Ok(());
        }

        let credentials = delegate
            .request_credentials(CredentialRequest::for_security_type(selected))
            .ok_or_else(|| EngineError::new("authentication", EngineErrorKind::CredentialsUnavailable))?;

        self.handle.lock().credentials.push(credentials.clone());

        let username_ok = self.script.username.is_none() || credentials.username == self.script.username;

        if username_ok && credentials.password == self.script.password {
            Ok(())
        } else {
            delegate.server_reason(&self.script.rejection_reason);

            Err(EngineError::new(
                "authentication",
                EngineErrorKind::AuthenticationRejected(self.script.rejection_reason.clone()),
            ))
        }
    }

    fn stall(&self, delegate: &dyn HandshakeDelegate) -> EngineResult<()> {
        let deadline = Instant::now() + self.script.stall;

        while Instant::now() < deadline {
            if self.script.stall_honours_cancel && delegate.is_cancelled() {
                return Err(EngineError::closed("waiting for the server"));
            }

            std::thread::sleep(Duration::from_millis(5));
        }

        Ok(())
    }

    fn run_handshake(&self, params: &HandshakeParams, delegate: &mut dyn HandshakeDelegate) -> EngineResult<Handshake> {
        if self.script.dial {
            TcpStream::connect((params.host.as_str(), params.port)).map_err(|e| EngineError::io("connect", e))?;
        }

        self.stall(delegate)?;

        for (level, message) in &self.script.logs {
            delegate.log(*level, message);
        }

        let selected = delegate
            .select_security_type(&self.script.offered)
            .ok_or_else(|| EngineError::new("security handshake", EngineErrorKind::NoCommonSecurityType))?;

        self.authenticate(selected, delegate)?;

        tracing::debug!(?selected, "Scripted handshake completed");

        Ok(Handshake {
            engine: Box::new(ScriptedEngine::new(
                self.handle.clone(),
                self.script.format,
                self.script.desktop_size,
            )),
            desktop_size: self.script.desktop_size,
            server_name: self.script.server_name.clone(),
        })
    }
}

impl EngineConnector for ScriptedConnector {
    fn handshake(&self, params: &HandshakeParams, delegate: &mut dyn HandshakeDelegate) -> EngineResult<Handshake> {
        self.handle.lock().handshakes.push(params.clone());

        let result = self.run_handshake(params, delegate);

        self.handle.lock().finished_handshakes += 1;

        result
    }
}

/// Engine replaying the steps pushed through its [`EngineHandle`].
///
/// The pixel buffer is overwritten in place, like a real engine does.
#[derive(Debug)]
pub struct ScriptedEngine {
    handle: EngineHandle,
    format: PixelFormat,
    size: DesktopSize,
    pixels: Vec<u8>,
}

impl ScriptedEngine {
    fn new(handle: EngineHandle, format: PixelFormat, size: DesktopSize) -> Self {
        Self {
            handle,
            format,
            size,
            pixels: vec![0; size.pixel_count() * format.bytes_per_pixel()],
        }
    }

    fn fill(&mut self, [r, g, b]: [u8; 3]) {
        let format = self.format;

        let encode = |channel: u8, max: u16, shift: u8| {
            let max = u32::from(max);
            ((u32::from(channel) * max + 127) / 255) << shift
        };

        let value = encode(r, format.red_max, format.red_shift)
            | encode(g, format.green_max, format.green_shift)
            | encode(b, format.blue_max, format.blue_shift);

        let bytes = if format.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };

        let bytes_per_pixel = format.bytes_per_pixel();
        let encoded = if format.big_endian {
            &bytes[bytes.len() - bytes_per_pixel..]
        } else {
            &bytes[..bytes_per_pixel]
        };

        for pixel in self.pixels.chunks_exact_mut(bytes_per_pixel) {
            pixel.copy_from_slice(encoded);
        }
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn poll_update(&mut self, timeout: Duration) -> EngineResult<EngineUpdate> {
        let step = self.handle.lock().steps.pop_front();

        match step {
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(EngineUpdate::None)
            }
            Some(Step::Fill(rgb)) => {
                self.fill(rgb);
                Ok(EngineUpdate::FramebufferReady)
            }
            Some(Step::DelayedFill(delay, rgb)) => {
                std::thread::sleep(delay);
                self.fill(rgb);
                Ok(EngineUpdate::FramebufferReady)
            }
            Some(Step::Resize(size)) => {
                self.size = size;
                self.pixels = vec![0; size.pixel_count() * self.format.bytes_per_pixel()];
                Ok(EngineUpdate::Resize(size))
            }
            Some(Step::Log(level, message)) => Ok(EngineUpdate::Log { level, message }),
            Some(Step::Fail(description)) => Err(EngineError::protocol("poll update", description)),
            Some(Step::Close) => Err(EngineError::closed("poll update")),
        }
    }

    fn current_pixels(&self) -> PixelBuffer<'_> {
        PixelBuffer::packed(self.format, self.size, &self.pixels)
    }

    fn send_key(&mut self, keysym: u32, down: bool) -> EngineResult<()> {
        self.handle.lock().keys.push((keysym, down));
        Ok(())
    }

    fn send_pointer(&mut self, x: u16, y: u16, button_mask: u8) -> EngineResult<()> {
        self.handle.lock().pointers.push((x, y, button_mask));
        Ok(())
    }

    fn close(&mut self) {
        self.handle.lock().close_count += 1;
    }
}

/// A single observer callback, as recorded by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connect,
    Disconnect,
    Failure(String),
    DetailedFailure {
        message: String,
        protocol_error: Option<String>,
        os_error_code: Option<i32>,
        os_error_message: Option<String>,
    },
    Frame {
        width: u16,
        height: u16,
    },
    Resize {
        width: u16,
        height: u16,
    },
    NegotiationStarted {
        offered: Vec<SecurityType>,
        supported: Vec<SecurityType>,
    },
    SecurityTypeSelected(SecurityType),
    Log(LogLevel, String),
    ServerReason(String),
    PasswordRequired,
    CredentialsRequired(CredentialScheme),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    detailed_failure: bool,
    typed_credentials: bool,
    username: Option<String>,
    password: Option<String>,
    frame_delay: Duration,
    disconnect_on_connect: bool,
    session: RefCell<Weak<VncSession>>,
    events: RefCell<Vec<Observed>>,
    states: RefCell<Vec<(Observed, SessionState)>>,
    frames: RefCell<Vec<FramebufferSnapshot>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_detailed_failure(mut self) -> Self {
        self.detailed_failure = true;
        self
    }

    #[must_use]
    pub fn with_legacy_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    #[must_use]
    pub fn with_typed_credentials(mut self, username: Option<&str>, password: Option<&str>) -> Self {
        self.typed_credentials = true;
        self.username = username.map(str::to_owned);
        self.password = password.map(str::to_owned);
        self
    }

    /// Time spent in each framebuffer callback.
    #[must_use]
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Calls `disconnect` on the attached session from within `on_connect`.
    #[must_use]
    pub fn with_disconnect_on_connect(mut self) -> Self {
        self.disconnect_on_connect = true;
        self
    }

    /// Lets callbacks observe the session state.
    pub fn attach(&self, session: &Rc<VncSession>) {
        *self.session.borrow_mut() = Rc::downgrade(session);
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.borrow().clone()
    }

    /// Session state at the time of each callback, when attached.
    pub fn states(&self) -> Vec<(Observed, SessionState)> {
        self.states.borrow().clone()
    }

    pub fn frames(&self) -> Vec<FramebufferSnapshot> {
        self.frames.borrow().clone()
    }

    pub fn count(&self, event: &Observed) -> usize {
        self.events.borrow().iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &Observed) -> bool {
        self.count(event) != 0
    }

    fn record(&self, event: Observed) {
        if let Some(session) = self.session.borrow().upgrade() {
            self.states.borrow_mut().push((event.clone(), session.state()));
        }

        self.events.borrow_mut().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_connect(&self) {
        self.record(Observed::Connect);

        if self.disconnect_on_connect {
            let session = self.session.borrow().upgrade();

            if let Some(session) = session {
                session.disconnect();
            }
        }
    }

    fn on_disconnect(&self) {
        self.record(Observed::Disconnect);
    }

    fn on_failure(&self, message: &str) {
        self.record(Observed::Failure(message.to_owned()));
    }

    fn on_detailed_failure(
        &self,
        message: &str,
        protocol_error: Option<&str>,
        os_error_code: Option<i32>,
        os_error_message: Option<&str>,
    ) {
        self.record(Observed::DetailedFailure {
            message: message.to_owned(),
            protocol_error: protocol_error.map(str::to_owned),
            os_error_code,
            os_error_message: os_error_message.map(str::to_owned),
        });
    }

    fn supports_detailed_failure(&self) -> bool {
        self.detailed_failure
    }

    fn on_framebuffer_update(&self, snapshot: FramebufferSnapshot) {
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }

        self.record(Observed::Frame {
            width: snapshot.width(),
            height: snapshot.height(),
        });

        self.frames.borrow_mut().push(snapshot);
    }

    fn on_resize(&self, width: u16, height: u16) {
        self.record(Observed::Resize { width, height });
    }

    fn on_security_negotiation_started(&self, offered: &[SecurityType], supported: &[SecurityType]) {
        self.record(Observed::NegotiationStarted {
            offered: offered.to_vec(),
            supported: supported.to_vec(),
        });
    }

    fn on_security_type_selected(&self, security_type: SecurityType) {
        self.record(Observed::SecurityTypeSelected(security_type));
    }

    fn on_log_message(&self, message: &str, level: LogLevel) {
        self.record(Observed::Log(level, message.to_owned()));
    }

    fn on_server_reason_message(&self, reason: &str) {
        self.record(Observed::ServerReason(reason.to_owned()));
    }

    fn on_password_required(&self) {
        self.record(Observed::PasswordRequired);
    }

    fn password_for_legacy_auth(&self) -> Option<String> {
        self.password.clone()
    }

    fn supports_typed_credentials(&self) -> bool {
        self.typed_credentials
    }

    fn on_credentials_required(&self, scheme: CredentialScheme) {
        self.record(Observed::CredentialsRequired(scheme));
    }

    fn username_for_auth(&self) -> Option<String> {
        self.username.clone()
    }

    fn password_for_auth(&self) -> Option<String> {
        self.password.clone()
    }
}

/// Builds a session driven by `observer`, and attaches the observer to it.
pub fn new_session(
    connector: Arc<dyn EngineConnector>,
    config: SessionConfig,
    observer: &Rc<RecordingObserver>,
) -> Rc<VncSession> {
    let dyn_observer: Rc<dyn SessionObserver> = Rc::<RecordingObserver>::clone(observer);
    let session = Rc::new(VncSession::new(connector, config, &dyn_observer));
    observer.attach(&session);
    session
}

/// Dispatches events until `condition` holds, or [`WAIT`] elapses.
pub fn pump_until(session: &VncSession, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;

    loop {
        if condition() {
            return true;
        }

        if Instant::now() >= deadline {
            return false;
        }

        session.wait_and_dispatch(Duration::from_millis(10));
    }
}

/// Waits for `condition` without dispatching anything, or until [`WAIT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;

    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    true
}
