use std::{net::IpAddr, path::PathBuf, sync::OnceLock};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use psremote_client_core::{Authentication, Endpoint, NtlmSecret, Scheme, WinRmConfig};
use tracing::debug;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry::Registry};
use url::Url;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEFAULT_KDC_PORT: u16 = 88;

fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("A panic occurred: {}", panic_info);
    }));
}

/// PowerShell remoting client over WinRM (blocking)
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Target host name or IP address
    #[arg(long, required_unless_present = "url")]
    pub host: Option<String>,

    /// Listener port (5985 for HTTP, 5986 for HTTPS when omitted)
    #[arg(long, conflicts_with = "url")]
    pub port: Option<u16>,

    /// Use HTTPS
    #[arg(long, conflicts_with = "url")]
    pub ssl: bool,

    /// Full endpoint URL, e.g. https://web01.corp.local:5986/wsman
    #[arg(long, conflicts_with = "host")]
    pub url: Option<String>,

    /// Account name: `user`, `DOMAIN\user` or `user@realm`
    #[arg(short, long)]
    pub user: String,

    #[arg(short, long)]
    pub password: Option<String>,

    /// NetBIOS domain (NTLM) or realm (Kerberos)
    #[arg(short, long)]
    pub domain: Option<String>,

    /// NT hash instead of a password, as `NTHASH` or `LMHASH:NTHASH` (NTLM only)
    #[arg(long, conflicts_with = "password")]
    pub nt_hash: Option<String>,

    #[arg(short, long, default_value_t = AuthMethod::Ntlm)]
    pub auth: AuthMethod,

    /// Kerberos service principal (defaults to HTTP/<host>)
    #[arg(long)]
    pub spn: Option<String>,

    /// KDC address as `host`, `host:port` or `tcp://host:port`; discovered through DNS if omitted
    #[arg(long)]
    pub kdc: Option<String>,

    /// Seconds the server may hold a receive before answering with a timeout
    #[arg(long, default_value_t = 5)]
    pub timeout: u32,

    /// Run a single command and exit instead of reading commands from stdin
    #[arg(short, long)]
    pub command: Option<String>,

    /// Increase logging verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, default_value = "psremote_client.log")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMethod {
    Basic,
    Ntlm,
    Kerberos,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Ntlm => write!(f, "ntlm"),
            Self::Kerberos => write!(f, "kerberos"),
        }
    }
}

/// Sends structured logs to `log_file`. `RUST_LOG` takes precedence over the verbosity count.
pub fn init_logging(verbose_level: u8, log_file: &std::path::Path) -> anyhow::Result<()> {
    setup_panic_hook();

    LogTracer::init().ok();

    let file = std::fs::File::create(log_file)
        .with_context(|| format!("failed to create log file {}", log_file.display()))?;
    let (nb_writer, guard) = tracing_appender::non_blocking(file);

    if LOG_GUARD.set(guard).is_err() {
        tracing::warn!("LOG_GUARD was already set. This may indicate a problem in initialization.");
    }

    let filter_str = match verbose_level {
        0 => "info,ureq=error,sspi=error",
        1 => "debug,ureq=warn,sspi=error",
        2 => "trace,ureq=info,sspi=warn",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let subscriber = Registry::default().with(env_filter).with(
        fmt::layer()
            .with_writer(nb_writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false)
            .compact(),
    );

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("Logging system initialized.");

    Ok(())
}

fn endpoint(args: &Args) -> anyhow::Result<Endpoint> {
    if let Some(url) = &args.url {
        return Ok(Endpoint::parse_url(url)?);
    }

    let host = args
        .host
        .clone()
        .context("either --host or --url is required")?;
    let scheme = if args.ssl { Scheme::Https } else { Scheme::Http };
    Ok(Endpoint::Host {
        host,
        port: args.port,
        scheme,
    })
}

/// `dc01`, `dc01:88` and `tcp://dc01:88` all name the same KDC.
fn kdc_url(value: &str) -> anyhow::Result<Url> {
    let candidate = if value.contains("://") {
        value.to_owned()
    } else if value.contains(':') {
        format!("tcp://{value}")
    } else {
        format!("tcp://{value}:{DEFAULT_KDC_PORT}")
    };
    Url::parse(&candidate).with_context(|| format!("invalid KDC address {value}"))
}

fn required_password(args: &Args) -> anyhow::Result<String> {
    match &args.password {
        Some(password) => Ok(password.clone()),
        None => bail!("{} authentication needs --password", args.auth),
    }
}

fn authentication(args: &Args, endpoint: &Endpoint) -> anyhow::Result<Authentication> {
    if args.nt_hash.is_some() && args.auth != AuthMethod::Ntlm {
        bail!("--nt-hash is only supported with NTLM");
    }

    let auth = match args.auth {
        AuthMethod::Basic => Authentication::Basic {
            username: args.user.clone(),
            password: required_password(args)?,
        },
        AuthMethod::Ntlm => {
            let secret = match &args.nt_hash {
                Some(hash) => NtlmSecret::nt_hash_from_hex(hash)?,
                None => NtlmSecret::Password(required_password(args)?),
            };
            Authentication::Ntlm {
                username: args.user.clone(),
                domain: args.domain.clone().unwrap_or_default(),
                secret,
            }
        }
        AuthMethod::Kerberos => {
            // Tickets are issued for names, never for addresses.
            if args.spn.is_none() && endpoint.hostname().parse::<IpAddr>().is_ok() {
                bail!("Kerberos against an IP address needs an explicit --spn");
            }
            Authentication::Kerberos {
                username: args.user.clone(),
                domain: args.domain.clone(),
                password: required_password(args)?,
                spn: args.spn.clone(),
                kdc_url: args.kdc.as_deref().map(kdc_url).transpose()?,
                client_computer_name: None,
            }
        }
    };
    Ok(auth)
}

/// Builds the connection settings; `server_certificate` is the DER of the TLS leaf, if fetched.
pub fn create_connector_config(
    args: &Args,
    server_certificate: Option<Vec<u8>>,
) -> anyhow::Result<WinRmConfig> {
    let endpoint = endpoint(args)?;
    let authentication = authentication(args, &endpoint)?;
    debug!(url = %endpoint.url(), auth = authentication.name(), "connector config");

    let mut config = WinRmConfig::builder()
        .endpoint(endpoint)
        .authentication(authentication)
        .operation_timeout(args.timeout)
        .build();
    config.server_certificate = server_certificate;

    Ok(config)
}

/// Where to reach the listener before any configuration is built: `(host, port, tls)`.
pub fn target(args: &Args) -> anyhow::Result<(String, u16, bool)> {
    let endpoint = endpoint(args)?;
    Ok((endpoint.hostname(), endpoint.port(), endpoint.is_tls()))
}
