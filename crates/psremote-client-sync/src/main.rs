mod config;
mod http_client;
mod kerberos;
mod shell;
mod tls;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use psremote_client_core::{KdcClient, RunspaceSession, WinRmTransport};
use tracing::{error, info, instrument};

use config::{AuthMethod, Args, create_connector_config, init_logging, target};
use http_client::UreqHttpClient;
use kerberos::TcpKdcClient;
use shell::Shell;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Head room on top of the operation timeout before a pending receive is abandoned.
const READ_GRACE: Duration = Duration::from_secs(60);

#[instrument(name = "main", level = "info")]
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, &args.log_file) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run_app(&args) {
        error!("Application failed to run: {:?}", e);
        return Err(e);
    }

    Ok(())
}

fn run_app(args: &Args) -> anyhow::Result<()> {
    info!("Starting WinRM PowerShell client (blocking)");

    let (host, port, tls) = target(args)?;
    info!(
        %host,
        port,
        username = %args.user,
        auth = %args.auth,
        scheme = %if tls { "HTTPS" } else { "HTTP" },
        "connecting to server"
    );

    // Only the sealing schemes bind to the certificate.
    let server_certificate = if tls && args.auth != AuthMethod::Basic {
        Some(tls::fetch_server_certificate(&host, port, CONNECT_TIMEOUT)?)
    } else {
        None
    };
    let config = create_connector_config(args, server_certificate)?;

    let read_timeout = Duration::from_secs(u64::from(config.operation_timeout)) + READ_GRACE;
    let http = UreqHttpClient::new(CONNECT_TIMEOUT, read_timeout, tls::connector()?);
    let kdc = (args.auth == AuthMethod::Kerberos)
        .then(|| Box::new(TcpKdcClient::new(CONNECT_TIMEOUT)) as Box<dyn KdcClient>);
    let transport = WinRmTransport::new(http, &config, kdc)?;

    let mut session = RunspaceSession::new(transport, &config);
    session.open().context("failed to open the remote runspace")?;
    info!(shell_id = %session.shell_id(), "runspace pool is open");

    let mut shell = Shell::new(session);
    ctrlc::set_handler(shell.interrupt_handler())
        .context("failed to install the Ctrl-C handler")?;
    let result = match &args.command {
        Some(command) => shell.execute(
            command,
            &mut std::io::stdout().lock(),
            &mut std::io::stderr().lock(),
        ),
        None => shell.repl(std::io::stdin().lock()),
    };
    shell.close();

    result
}
