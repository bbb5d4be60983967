use std::io::{BufRead, IsTerminal, Write};

use anyhow::Context;
use psremote_client_core::{OutputRecord, RunspaceSession, SoapTransport};
use tracing::{debug, info, instrument, warn};

const LOCATION_QUERY: &str = "Get-Location | Select -Expand Path";
const EXIT_COMMANDS: [&str; 2] = ["exit", "quit"];

/// Line-oriented front end over an open [`RunspaceSession`].
pub struct Shell<T: SoapTransport> {
    session: RunspaceSession<T>,
    cwd: String,
}

impl<T: SoapTransport> Shell<T> {
    pub fn new(session: RunspaceSession<T>) -> Self {
        Self {
            session,
            cwd: String::new(),
        }
    }

    /// Ctrl-C handler for the process: the running command, if any, is interrupted before its
    /// next receive. A request made at the prompt is dropped when the next command starts.
    pub fn interrupt_handler(&self) -> impl FnMut() + Send + 'static {
        let token = self.session.cancellation_token();
        move || {
            info!("Ctrl-C received, interrupting the running command");
            token.cancel();
        }
    }

    /// Runs `command` and streams its records to `out` and `err`.
    #[instrument(skip(self, out, err), fields(shell_id = %self.session.shell_id()))]
    pub fn execute(
        &mut self,
        command: &str,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> anyhow::Result<()> {
        let output = self
            .session
            .run_command(command)
            .context("failed to start the command")?;

        for record in output {
            render(&record?, out, err)?;
        }
        out.flush()?;
        err.flush()?;
        Ok(())
    }

    /// Reads commands from `input` until end of input or `exit`.
    pub fn repl(&mut self, input: impl BufRead) -> anyhow::Result<()> {
        let interactive = std::io::stdin().is_terminal();
        let mut stdout = std::io::stdout().lock();
        let mut stderr = std::io::stderr().lock();

        self.update_cwd();
        if interactive {
            prompt(&mut stdout, &self.cwd)?;
        }

        for line in input.lines() {
            let line = line.context("failed to read command")?;
            let command = line.trim();

            if EXIT_COMMANDS.contains(&command) {
                info!("exit requested");
                break;
            }
            if !command.is_empty() {
                self.execute(command, &mut stdout, &mut stderr)?;
                self.update_cwd();
            }
            if interactive {
                prompt(&mut stdout, &self.cwd)?;
            }
        }
        Ok(())
    }

    fn update_cwd(&mut self) {
        match self.session.run_to_string(LOCATION_QUERY) {
            Ok(cwd) => self.cwd = cwd.trim().to_owned(),
            Err(error) => debug!(%error, "could not refresh the working directory"),
        }
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

fn prompt(out: &mut impl Write, cwd: &str) -> std::io::Result<()> {
    write!(out, "PS {cwd}> ")?;
    out.flush()
}

/// Writes one record: pipeline output and host text to `out`, everything else to `err`.
pub fn render(
    record: &OutputRecord,
    out: &mut impl Write,
    err: &mut impl Write,
) -> std::io::Result<()> {
    match record {
        OutputRecord::Stdout(text) | OutputRecord::Verbose(text) => writeln!(out, "{text}"),
        OutputRecord::Info { text, newline } => {
            if *newline {
                writeln!(out, "{text}")
            } else {
                write!(out, "{text}")
            }
        }
        OutputRecord::Error(text) => writeln!(err, "{text}"),
        OutputRecord::Warning(text) => writeln!(err, "WARNING: {text}"),
        OutputRecord::Progress(text) => writeln!(err, "{text}"),
        OutputRecord::Timeout(count) => {
            if *count > 1 {
                warn!(count, "command is still running");
            }
            Ok(())
        }
    }
}
