use psremote_psrp::{
    Defragmenter, Fragmenter, PsrpMessage,
    ps_value::{CreatePipeline, InitRunspacePool, SessionCapability},
};
use psremote_wsman::{SoapResponse, WsManRequest};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    ClientError,
    config::WinRmConfig,
    connector::SoapTransport,
    runspace::{CancellationToken, CommandOutput, OutputRecord},
};

/// Best-effort receive polls that follow shell creation.
const OPENING_POLLS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

/// One remote PowerShell runspace pool hosted in a WinRM shell.
///
/// The session runs strictly one request at a time and tracks at most one command as current.
/// Dropping a session whose shell creation was attempted closes it, even when the creation
/// failed, since the shell may exist on the server regardless.
pub struct RunspaceSession<T: SoapTransport> {
    pub(super) transport: T,
    pub(super) request: WsManRequest,
    pub(super) fragmenter: Fragmenter,
    pub(super) defragmenter: Defragmenter,
    state: SessionState,
    create_attempted: bool,
    pub(super) current_command: Option<Uuid>,
    pub(super) cancel: CancellationToken,
}

impl<T: SoapTransport> RunspaceSession<T> {
    pub fn new(transport: T, config: &WinRmConfig) -> Self {
        let request = WsManRequest::builder()
            .to(config.endpoint.url())
            .session_id(Uuid::new_v4())
            .shell_id(Uuid::new_v4())
            .operation_timeout(config.operation_timeout)
            .max_envelope_size(config.max_envelope_size)
            .locale(config.locale.clone())
            .build();

        Self {
            transport,
            request,
            fragmenter: Fragmenter::default(),
            defragmenter: Defragmenter::new(),
            state: SessionState::Unopened,
            create_attempted: false,
            current_command: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn shell_id(&self) -> Uuid {
        self.request.shell_id()
    }

    pub fn session_id(&self) -> Uuid {
        self.request.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token whose cancellation interrupts the command being iterated.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Creates the shell with the session capability and runspace pool init messages.
    #[instrument(
        skip(self),
        fields(shell_id = %self.request.shell_id()),
        name = "RunspaceSession::open"
    )]
    pub fn open(&mut self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Unopened => {}
            SessionState::Open => return Ok(()),
            SessionState::Closed => {
                return Err(ClientError::Protocol("session is already closed".into()));
            }
        }

        let shell_id = self.request.shell_id();
        let messages = [
            PsrpMessage::from_ps_object(&SessionCapability::default(), shell_id, Uuid::nil())?,
            PsrpMessage::from_ps_object(&InitRunspacePool::default(), shell_id, Uuid::nil())?,
        ];
        let creation = self.fragmenter.fragment(&messages)?;

        let envelope = self.request.create(&creation)?;
        self.create_attempted = true;
        let reply = self.transport.send(&envelope)?;
        if let SoapResponse::Fault(fault) = SoapResponse::parse(&reply)? {
            warn!(subcode = %fault.subcode, "shell creation faulted");
            return Err(ClientError::Protocol(
                format!("shell creation failed: {}", fault.message()).into(),
            ));
        }

        self.state = SessionState::Open;
        info!("shell created");

        // The pool's state and capability replies are not needed; a failure here surfaces when
        // the first pipeline is created.
        for poll in 0..OPENING_POLLS {
            if let Err(error) = self.poll_shell() {
                debug!(poll, %error, "opening poll failed");
            }
        }

        Ok(())
    }

    fn poll_shell(&mut self) -> Result<(), ClientError> {
        let envelope = self.request.receive(None)?;
        let reply = self.transport.send(&envelope)?;

        match SoapResponse::parse(&reply)? {
            SoapResponse::Receive(receive) => {
                let messages = self
                    .defragmenter
                    .defragment_all(receive.streams.iter().map(Vec::as_slice))?;
                for message in messages {
                    debug!(message_type = message.message_type.name(), "runspace pool message");
                }
            }
            SoapResponse::Fault(fault) => {
                debug!(
                    subcode = %fault.subcode,
                    timeout = fault.is_timeout(),
                    "opening poll faulted"
                );
            }
            other => debug!(?other, "unexpected reply to opening poll"),
        }
        Ok(())
    }

    /// Starts `text` as `Invoke-Expression <text> | Out-String -Stream` and returns its output.
    ///
    /// If the server does not acknowledge the pipeline the output holds a single error record.
    #[instrument(
        skip(self, text),
        fields(shell_id = %self.request.shell_id(), len = text.len()),
        name = "RunspaceSession::run_command"
    )]
    pub fn run_command(&mut self, text: &str) -> Result<CommandOutput<'_, T>, ClientError> {
        if self.state != SessionState::Open {
            return Err(ClientError::Protocol(
                format!("cannot run a command in a {:?} session", self.state).into(),
            ));
        }
        // A request raised between commands does not apply to this one.
        self.cancel.take();

        let command_id = Uuid::new_v4();
        let pipeline = CreatePipeline::invoke_expression(text);
        let message = PsrpMessage::from_ps_object(&pipeline, self.request.shell_id(), command_id)?;
        let arguments = self.fragmenter.fragment(&[message])?;

        let envelope = self.request.command(command_id, &arguments)?;
        let reply = self.transport.send(&envelope)?;

        match SoapResponse::parse(&reply)? {
            SoapResponse::Command => {
                debug!(%command_id, "pipeline created");
                self.current_command = Some(command_id);
                Ok(CommandOutput::new(self, command_id))
            }
            other => {
                warn!(%command_id, response = ?other, "pipeline was not acknowledged");
                Ok(CommandOutput::failed(self, command_id, "failed to create pipeline"))
            }
        }
    }

    /// Runs `text` to completion and renders its text output.
    ///
    /// Standard output lines and information messages are concatenated; the first error
    /// record is returned as [`ClientError::CommandFailed`] once the command has finished.
    pub fn run_to_string(&mut self, text: &str) -> Result<String, ClientError> {
        let mut rendered = String::new();
        let mut first_error = None;

        for record in self.run_command(text)? {
            match record? {
                OutputRecord::Stdout(line) => {
                    rendered.push_str(&line);
                    rendered.push('\n');
                }
                OutputRecord::Info { text, newline } => {
                    rendered.push_str(&text);
                    if newline {
                        rendered.push('\n');
                    }
                }
                OutputRecord::Error(message) => {
                    first_error.get_or_insert(message);
                }
                other => debug!(?other, "not rendered"),
            }
        }

        if let Some(message) = first_error {
            return Err(ClientError::CommandFailed(message));
        }
        if rendered.ends_with('\n') {
            rendered.pop();
        }
        Ok(rendered)
    }

    /// Sends Ctrl-C to the current command, if any.
    ///
    /// A command whose output ended on a local error stays current until this is called, since
    /// it may still be running on the server.
    pub fn interrupt(&mut self) -> Result<(), ClientError> {
        match self.current_command.take() {
            Some(command_id) => self.signal(command_id),
            None => {
                debug!("no command to interrupt");
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(shell_id = %self.request.shell_id()))]
    pub(super) fn signal(&mut self, command_id: Uuid) -> Result<(), ClientError> {
        let envelope = self.request.signal(command_id)?;
        let reply = self.transport.send(&envelope)?;

        match SoapResponse::parse(&reply)? {
            SoapResponse::Signal => info!("interrupt delivered"),
            SoapResponse::Fault(fault) => warn!(reason = %fault.reason, "interrupt faulted"),
            other => debug!(?other, "unexpected reply to signal"),
        }
        Ok(())
    }

    /// Deletes the shell. Exactly one delete is attempted per session, whatever happened
    /// before; failures are logged, never returned.
    #[instrument(
        skip(self),
        fields(shell_id = %self.request.shell_id()),
        name = "RunspaceSession::close"
    )]
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.current_command = None;

        let outcome = self
            .request
            .delete()
            .map_err(ClientError::from)
            .and_then(|envelope| self.transport.send(&envelope))
            .and_then(|reply| SoapResponse::parse(&reply).map_err(ClientError::from));

        match outcome {
            Ok(SoapResponse::Delete) => info!("shell deleted"),
            Ok(SoapResponse::Fault(fault)) => {
                warn!(reason = %fault.reason, "shell deletion faulted");
            }
            Ok(other) => debug!(?other, "unexpected reply to delete"),
            Err(error) => warn!(%error, "shell deletion failed"),
        }
    }
}

impl<T: SoapTransport> Drop for RunspaceSession<T> {
    fn drop(&mut self) {
        if self.create_attempted && self.state != SessionState::Closed {
            self.close();
        }
    }
}

impl<T: SoapTransport> std::fmt::Debug for RunspaceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunspaceSession")
            .field("shell_id", &self.request.shell_id())
            .field("state", &self.state)
            .field("current_command", &self.current_command)
            .field("next_object_id", &self.fragmenter.next_object_id())
            .finish_non_exhaustive()
    }
}
