use std::collections::VecDeque;

use psremote_psrp::extract_records;
use psremote_wsman::{ReceiveResponse, SoapResponse};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    ClientError,
    connector::SoapTransport,
    runspace::{OutputRecord, RunspaceSession},
};

/// Lazy output of one command.
///
/// Every pull that finds no buffered record issues one Receive round trip, blocking for up to
/// the operation timeout. The sequence ends once the server reports a command state, after a
/// remote fault, or with the first local error, which follows any records already received.
/// Dropping it early, or ending on a local error, leaves the remote command running until it
/// is interrupted or the session closes.
pub struct CommandOutput<'s, T: SoapTransport> {
    session: &'s mut RunspaceSession<T>,
    command_id: Uuid,
    pending: VecDeque<OutputRecord>,
    timeouts: u32,
    finished: bool,
    failure: Option<ClientError>,
}

impl<'s, T: SoapTransport> CommandOutput<'s, T> {
    pub(super) fn new(session: &'s mut RunspaceSession<T>, command_id: Uuid) -> Self {
        Self {
            session,
            command_id,
            pending: VecDeque::new(),
            timeouts: 0,
            finished: false,
            failure: None,
        }
    }

    /// An output holding just `message` as an error record.
    pub(super) fn failed(
        session: &'s mut RunspaceSession<T>,
        command_id: Uuid,
        message: &str,
    ) -> Self {
        let mut output = Self::new(session, command_id);
        output.pending.push_back(OutputRecord::Error(message.to_owned()));
        output.finished = true;
        output
    }

    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty() && self.failure.is_none()
    }

    /// Sends Ctrl-C to this command while it is current. Output keeps flowing until the server
    /// reports the command stopped.
    pub fn interrupt(&mut self) -> Result<(), ClientError> {
        if self.session.current_command != Some(self.command_id) {
            return Ok(());
        }
        self.session.signal(self.command_id)
    }

    /// Ends the sequence for a command the server reported as over.
    fn finish(&mut self) {
        self.finished = true;
        if self.session.current_command == Some(self.command_id) {
            self.session.current_command = None;
        }
    }

    /// Ends the sequence on a local error. The command stays current.
    fn fail(&mut self, error: ClientError) {
        warn!(command_id = %self.command_id, %error, "command output failed");
        self.finished = true;
        self.failure = Some(error);
    }

    #[instrument(skip(self), fields(command_id = %self.command_id))]
    fn poll(&mut self) -> Result<(), ClientError> {
        let envelope = self.session.request.receive(Some(self.command_id))?;
        let reply = self.session.transport.send(&envelope)?;

        match SoapResponse::parse(&reply)? {
            SoapResponse::Fault(fault) if fault.is_timeout() => {
                self.timeouts += 1;
                debug!(timeouts = self.timeouts, "receive timed out, command still running");
                self.pending.push_back(OutputRecord::Timeout(self.timeouts));
            }
            SoapResponse::Fault(fault) => {
                warn!(subcode = %fault.subcode, reason = %fault.reason, "command faulted");
                self.pending.push_back(OutputRecord::Error(fault.message()));
                self.finish();
            }
            SoapResponse::Receive(receive) => self.accept(&receive)?,
            other => {
                return Err(ClientError::Protocol(
                    format!("unexpected reply to receive: {other:?}").into(),
                ));
            }
        }
        Ok(())
    }

    fn accept(&mut self, receive: &ReceiveResponse) -> Result<(), ClientError> {
        self.timeouts = 0;

        let messages = self
            .session
            .defragmenter
            .defragment_all(receive.streams.iter().map(Vec::as_slice))?;
        for message in &messages {
            if message.pid != self.command_id {
                debug!(
                    message_type = message.message_type.name(),
                    pid = %message.pid,
                    "message for another pipeline"
                );
            }
            self.pending
                .extend(extract_records(message)?.into_iter().map(OutputRecord::from));
        }

        if receive.is_done() {
            info!(state = %receive.command_state, "command finished");
            self.finish();
        }
        Ok(())
    }
}

impl<T: SoapTransport> Iterator for CommandOutput<'_, T> {
    type Item = Result<OutputRecord, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if let Some(error) = self.failure.take() {
                return Some(Err(error));
            }
            if self.finished {
                return None;
            }

            if self.session.cancel.take() {
                info!(command_id = %self.command_id, "cancellation requested");
                if let Err(error) = self.interrupt() {
                    warn!(%error, "failed to deliver interrupt");
                }
            }

            if let Err(error) = self.poll() {
                self.fail(error);
            }
        }
    }
}

impl<T: SoapTransport> std::iter::FusedIterator for CommandOutput<'_, T> {}

impl<T: SoapTransport> std::fmt::Debug for CommandOutput<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOutput")
            .field("command_id", &self.command_id)
            .field("pending", &self.pending.len())
            .field("timeouts", &self.timeouts)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
