//! secure-pinentry - Main entry point.
//!
//! This is the PIN entry server. The caller starts it with stdin and stdout
//! connected to itself and drives it with line commands (SETDESC, GETPIN,
//! CONFIRM, ...). The user is asked on the controlling terminal.
//!
//! # Architecture
//!
//! - stdin/stdout carry the protocol, so logs go to stderr (or journald)
//! - One conversation per process, served on a single-threaded runtime
//! - Secrets live only in locked memory that is zeroed when released

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::BufReader;

use secure_pinentry::{Config, Server, TtyProvider, UnbufferedStdout};
use secure_pinentry_core::PromptConfig;

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Secure PIN and passphrase entry for agents speaking the line protocol.
#[derive(Parser, Debug)]
#[command(name = "secure-pinentry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// X display to show the prompt on
    #[arg(long, value_name = "DISPLAY")]
    display: Option<String>,

    /// Terminal device of the caller
    #[arg(long, value_name = "TTY")]
    ttyname: Option<String>,

    /// Terminal type of the caller
    #[arg(long, value_name = "TYPE")]
    ttytype: Option<String>,

    /// Locale naming the terminal's character encoding
    #[arg(long, value_name = "LOCALE")]
    lc_ctype: Option<String>,

    /// Locale for messages
    #[arg(long, value_name = "LOCALE")]
    lc_messages: Option<String>,

    /// Ask for additional settings along with the secret
    #[arg(short, long)]
    enhanced: bool,

    /// Do not grab the keyboard while prompting
    #[arg(short = 'g', long)]
    no_global_grab: bool,

    /// Window to place the prompt over
    #[arg(long, value_name = "WID")]
    parent_wid: Option<u64>,

    /// Enable debug mode (implies debug logging)
    #[arg(short, long)]
    debug: bool,

    /// Seconds to wait for the user, 0 waits forever
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Path to config file [default: ~/.config/secure-pinentry/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Log level from `-v` and `--debug`.
    fn log_level(&self) -> &'static str {
        match (self.debug, self.verbose) {
            (_, 3..) => "trace",
            (true, _) | (_, 2) => "debug",
            (false, 1) => "info",
            (false, _) => "warn",
        }
    }

    /// Apply flags given on the command line on top of the configured defaults.
    fn apply(&self, config: &mut PromptConfig) {
        if self.display.is_some() {
            config.display = self.display.clone();
        }
        if self.ttyname.is_some() {
            config.tty_name = self.ttyname.clone();
        }
        if self.ttytype.is_some() {
            config.tty_type = self.ttytype.clone();
        }
        if self.lc_ctype.is_some() {
            config.lc_ctype = self.lc_ctype.clone();
        }
        if self.lc_messages.is_some() {
            config.lc_messages = self.lc_messages.clone();
        }
        if self.enhanced {
            config.enhanced = true;
        }
        if self.no_global_grab {
            config.grab = false;
        }
        if let Some(wid) = self.parent_wid {
            config.parent_wid = wid;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
    }
}

fn setup_logging(level: &str) {
    // Use RUST_LOG=debug for verbose output, or CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Check if running under systemd (JOURNAL_STREAM is set when stderr goes to the journal)
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    // stdout carries the protocol, so always log to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

/// Refuse to run set-uid or set-gid.
fn check_privileges() -> Result<()> {
    // Safety: these calls have no preconditions and cannot fail
    let (uid, euid) = unsafe { (libc::getuid(), libc::geteuid()) };
    let (gid, egid) = unsafe { (libc::getgid(), libc::getegid()) };

    if uid != euid || gid != egid {
        bail!("real and effective ids differ, refusing to run with changed privileges");
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")?
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            if let Some(path) = Config::default_path() {
                if path.exists() {
                    info!(path = %path.display(), "Loaded configuration");
                } else {
                    debug!("No config file found, using defaults");
                }
            }
            config
        }
    };
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level());

    if let Err(e) = check_privileges() {
        error!(error = %e, "Privilege check failed");
        return Err(e);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting secure-pinentry"
    );

    let config = load_config(&cli)?;

    let mut prompt = config.prompt_config();
    cli.apply(&mut prompt);

    let session = config.session(prompt);
    let mut server = Server::with_session(TtyProvider::new(), session);

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = UnbufferedStdout::new().context("Failed to open stdout")?;

    if let Err(e) = server.run(stdin, stdout).await {
        error!(error = %e, "Conversation with caller failed");
        return Err(e).context("Conversation with caller failed");
    }

    debug!("Conversation finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "secure-pinentry",
            "--display",
            ":1",
            "--ttyname",
            "/dev/pts/2",
            "--lc-ctype",
            "de_DE.ISO-8859-1",
            "-e",
            "-g",
            "--parent-wid",
            "4242",
            "--timeout",
            "20",
        ])
        .unwrap();

        let mut config = PromptConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.display.as_deref(), Some(":1"));
        assert_eq!(config.tty_name.as_deref(), Some("/dev/pts/2"));
        assert_eq!(config.lc_ctype.as_deref(), Some("de_DE.ISO-8859-1"));
        assert!(config.enhanced);
        assert!(!config.grab);
        assert_eq!(config.parent_wid, 4242);
        assert_eq!(config.timeout, 20);
        assert!(!config.debug);
    }

    #[test]
    fn absent_flags_keep_configured_values() {
        let cli = Cli::try_parse_from(["secure-pinentry"]).unwrap();

        let mut config = PromptConfig {
            grab: false,
            timeout: 30,
            ..PromptConfig::default()
        };
        cli.apply(&mut config);

        assert!(!config.grab);
        assert_eq!(config.timeout, 30);
    }

    #[test]
    fn malformed_parent_wid_is_rejected() {
        assert!(Cli::try_parse_from(["secure-pinentry", "--parent-wid", "abc"]).is_err());
    }

    #[test]
    fn log_levels() {
        let level = |args: &[&str]| {
            let mut argv = vec!["secure-pinentry"];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).unwrap().log_level()
        };

        assert_eq!(level(&[]), "warn");
        assert_eq!(level(&["-v"]), "info");
        assert_eq!(level(&["-vv"]), "debug");
        assert_eq!(level(&["-d"]), "debug");
        assert_eq!(level(&["-d", "-vvv"]), "trace");
    }
}
