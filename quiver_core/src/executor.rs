use crate::input::TestCase;
use crate::protocol::{VALID_PASSCODE, opcode, response};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;

/// Status and body returned by a structured (HTTP) target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// What the target answered to one executed test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Response code bytes from a binary target; empty when it said nothing.
    Response(Vec<u8>),
    Http(HttpResponse),
}

/// The link to the target failed: unreachable, dropped mid-exchange, or unable to send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} against {target} failed: {reason}")]
pub struct TransportError {
    /// What was being attempted (`connect`, `write_command`, `post`, ...).
    pub operation: String,
    /// Device name or URL of the target.
    pub target: String,
    pub reason: String,
}

impl TransportError {
    pub fn new(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// A single execution attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The connection is gone; the campaign should reconnect before going on.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The attempt failed on its own (timeout, refused request); nothing to recover.
    #[error("execution attempt failed: {0}")]
    Attempt(String),
}

impl ExecutionError {
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, ExecutionError::Transport(_))
    }
}

/// Sends test cases to a live target. The campaign owns exactly one and never runs two
/// attempts at once.
pub trait TargetExecutor {
    /// Human-readable identity of the target, used in diagnostics.
    fn target(&self) -> String;

    fn execute(&mut self, test_case: &TestCase) -> Result<Observation, ExecutionError>;

    /// Rebuilds the connection after a transport failure. Stateless targets have
    /// nothing to rebuild.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Byte-command link to a binary target (a BLE lock in practice).
pub trait CommandTransport {
    fn connect(&mut self, device_name: &str) -> Result<(), TransportError>;
    fn write_command(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
    /// Every log line the target has emitted so far, oldest first.
    fn read_logs(&mut self) -> Vec<String>;
}

/// JSON-over-HTTP client for structured targets.
pub trait HttpClient {
    fn post(
        &mut self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &JsonValue,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Where the executor stands with its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Never connected; the first execution opens the link.
    Fresh,
    Up,
    /// Lost after a transport failure. Only [`TargetExecutor::reconnect`] brings it back.
    Dropped,
}

/// Executes binary test cases over a [`CommandTransport`].
///
/// The first execution connects. Once the link drops, executions fail fast with a
/// transport error until the campaign calls `reconnect`, so the reconnect pause is
/// always honoured.
pub struct CommandExecutor<T: CommandTransport> {
    transport: T,
    device_name: String,
    reconnect_pause: Duration,
    link: Link,
}

impl<T: CommandTransport> CommandExecutor<T> {
    pub fn new(transport: T, device_name: impl Into<String>, reconnect_pause: Duration) -> Self {
        Self {
            transport,
            device_name: device_name.into(),
            reconnect_pause,
            link: Link::Fresh,
        }
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        tracing::info!(device = %self.device_name, "connecting");
        match self.transport.connect(&self.device_name) {
            Ok(()) => {
                self.link = Link::Up;
                Ok(())
            }
            Err(err) => {
                self.link = Link::Dropped;
                Err(err)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link == Link::Up
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: CommandTransport> TargetExecutor for CommandExecutor<T> {
    fn target(&self) -> String {
        self.device_name.clone()
    }

    fn execute(&mut self, test_case: &TestCase) -> Result<Observation, ExecutionError> {
        let Some(command) = test_case.command_bytes() else {
            return Err(ExecutionError::Attempt(
                "structured payload sent to a command target".to_string(),
            ));
        };
        match self.link {
            Link::Fresh => self.connect()?,
            Link::Up => {}
            Link::Dropped => {
                return Err(TransportError::new(
                    "write_command",
                    self.device_name.as_str(),
                    "link dropped, waiting for reconnect",
                )
                .into());
            }
        }
        match self.transport.write_command(command) {
            Ok(bytes) => Ok(Observation::Response(bytes)),
            Err(err) => {
                self.link = Link::Dropped;
                Err(err.into())
            }
        }
    }

    /// Disconnects, waits out the reconnect pause, then connects again.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        if let Err(err) = self.transport.disconnect() {
            tracing::debug!("disconnect before reconnect failed: {err}");
        }
        self.link = Link::Dropped;
        sleep(self.reconnect_pause);
        self.connect()
    }
}

/// Posts structured test cases as JSON to a fixed endpoint.
pub struct HttpExecutor<C: HttpClient> {
    client: C,
    url: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
}

impl<C: HttpClient> HttpExecutor<C> {
    pub fn new(
        client: C,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            timeout,
        }
    }
}

impl<C: HttpClient> TargetExecutor for HttpExecutor<C> {
    fn target(&self) -> String {
        self.url.clone()
    }

    /// Network errors are isolated to the attempt: every request stands alone.
    fn execute(&mut self, test_case: &TestCase) -> Result<Observation, ExecutionError> {
        let body = test_case.to_json();
        self.client
            .post(&self.url, &self.headers, &body, self.timeout)
            .map(Observation::Http)
            .map_err(|err| ExecutionError::Attempt(err.to_string()))
    }
}

/// In-process stand-in for the smart lock.
///
/// Authenticate (0x00) followed by the valid passcode answers success and unlocks
/// open/close; a wrong passcode answers auth-fail; open/close before that answer
/// not-allowed; undefined opcodes answer invalid-command; an empty command gets no
/// answer. Every non-success answer is also written to the log as `[Error] Code: NN`.
#[derive(Debug, Default)]
pub struct SimulatedLock {
    connected: Option<String>,
    authenticated: bool,
    logs: Vec<String>,
}

impl SimulatedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn answer(&mut self, command: &[u8]) -> Vec<u8> {
        let Some(&op) = command.first() else {
            return Vec::new();
        };
        let code = match op {
            opcode::AUTHENTICATE => {
                if command.get(1..=VALID_PASSCODE.len()) == Some(&VALID_PASSCODE[..]) {
                    self.authenticated = true;
                    response::SUCCESS
                } else {
                    response::AUTH_FAIL
                }
            }
            opcode::OPEN | opcode::CLOSE if self.authenticated => response::SUCCESS,
            opcode::OPEN | opcode::CLOSE => response::NOT_ALLOWED,
            _ => response::INVALID_COMMAND,
        };
        vec![code]
    }
}

impl CommandTransport for SimulatedLock {
    fn connect(&mut self, device_name: &str) -> Result<(), TransportError> {
        self.connected = Some(device_name.to_string());
        self.logs.push(format!("[Info] Connected to {device_name}"));
        Ok(())
    }

    fn write_command(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        if self.connected.is_none() {
            return Err(TransportError::new(
                "write_command",
                "simulated lock",
                "not connected",
            ));
        }
        self.logs.push(format!("[Info] Command: {command:02X?}"));
        let answer = self.answer(command);
        if let Some(&code) = answer.first()
            && code != response::SUCCESS
        {
            self.logs.push(format!("[Error] Code: {code:02X}"));
        }
        Ok(answer)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = None;
        self.authenticated = false;
        Ok(())
    }

    fn read_logs(&mut self) -> Vec<String> {
        self.logs.clone()
    }
}
