//! Blocking terminal I/O for the tty provider.
//!
//! Reads wait in `poll(2)` for short slices, so a prompt timeout or an
//! interaction that was given up on ends them promptly instead of leaving a
//! reader parked on the terminal. Hidden input is read with echo switched
//! off for exactly as long as an [`EchoGuard`] lives.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use secure_pinentry_core::{InteractionError, PromptConfig};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Longest single wait before the cancel flag is looked at again.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// When an interaction stops waiting for the user.
#[derive(Debug, Clone, Copy)]
pub(super) struct Deadline {
    at: Option<Instant>,
    seconds: u64,
}

impl Deadline {
    /// Start the clock for the timeout configured in `config`.
    pub(super) fn start(config: &PromptConfig) -> Self {
        Self {
            at: config.timeout().map(|limit| Instant::now() + limit),
            seconds: config.timeout,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Tells a blocking read to give up.
#[derive(Debug, Clone, Default)]
pub(super) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub(super) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Run terminal work on the blocking pool.
///
/// If the returned future is dropped before `work` finishes, the flag handed
/// to `work` is cancelled and its reads end within one poll slice.
pub(super) async fn run_blocking<T, F>(work: F) -> Result<T, InteractionError>
where
    T: Send + 'static,
    F: FnOnce(&CancelFlag) -> Result<T, InteractionError> + Send + 'static,
{
    let flag = CancelFlag::default();
    let _abandon = CancelOnDrop(flag.clone());

    tokio::task::spawn_blocking(move || work(&flag))
        .await
        .map_err(|e| InteractionError::UiError(format!("Task failed: {}", e)))?
}

/// Map a read error; end of input counts as the user giving up.
pub(super) fn read_failed(e: io::Error) -> InteractionError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::Interrupted => InteractionError::Cancelled,
        _ => InteractionError::UiError(format!("Failed to read from terminal: {}", e)),
    }
}

/// An open terminal device.
pub(super) struct Terminal {
    file: File,
}

impl Terminal {
    /// Open `device` for reading and writing.
    pub(super) fn open(device: &Path) -> Result<Self, InteractionError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| {
                InteractionError::InitializationFailed(format!(
                    "Failed to open {}: {}",
                    device.display(),
                    e
                ))
            })?;
        Ok(Self::from_file(file))
    }

    pub(super) fn from_file(file: File) -> Self {
        Self { file }
    }

    pub(super) fn write_text(&self, text: &[u8]) -> Result<(), InteractionError> {
        let mut out = &self.file;
        out.write_all(text)
            .and_then(|()| out.flush())
            .map_err(|e| InteractionError::UiError(format!("Failed to write prompt: {}", e)))
    }

    /// Switch echo off until the returned guard is dropped.
    ///
    /// A device that is not a terminal has no echo, so nothing is changed.
    pub(super) fn hide_input(&self) -> Result<EchoGuard<'_>, InteractionError> {
        let original = match termios::tcgetattr(&self.file) {
            Ok(original) => original,
            Err(Errno::ENOTTY) => {
                debug!("Input device is not a terminal, echo left alone");
                return Ok(EchoGuard {
                    file: &self.file,
                    original: None,
                });
            }
            Err(e) => {
                return Err(InteractionError::UiError(format!(
                    "Failed to read terminal settings: {}",
                    e
                )))
            }
        };

        let mut quiet = original.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        quiet.local_flags.insert(LocalFlags::ECHONL);
        termios::tcsetattr(&self.file, SetArg::TCSAFLUSH, &quiet).map_err(|e| {
            InteractionError::UiError(format!("Failed to switch off echo: {}", e))
        })?;

        Ok(EchoGuard {
            file: &self.file,
            original: Some(original),
        })
    }

    /// Read one line and hand each byte to `push`, without the line end.
    ///
    /// A CR is dropped. End of input cancels, an expired deadline times out
    /// and a cancelled flag cancels.
    pub(super) fn read_line<F>(
        &self,
        deadline: Deadline,
        cancel: &CancelFlag,
        mut push: F,
    ) -> Result<(), InteractionError>
    where
        F: FnMut(u8) -> Result<(), InteractionError>,
    {
        let mut byte = Zeroizing::new([0u8; 1]);
        loop {
            self.wait_readable(deadline, cancel)?;

            match (&self.file).read(&mut byte[..]) {
                Ok(0) => return Err(InteractionError::Cancelled),
                Ok(_) => match byte[0] {
                    b'\n' => return Ok(()),
                    b'\r' => {}
                    value => push(value)?,
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => return Err(read_failed(e)),
            }
        }
    }

    fn wait_readable(&self, deadline: Deadline, cancel: &CancelFlag) -> Result<(), InteractionError> {
        loop {
            if cancel.is_cancelled() {
                debug!("Terminal read abandoned");
                return Err(InteractionError::Cancelled);
            }

            let slice = match deadline.remaining() {
                Some(left) if left.is_zero() => {
                    return Err(InteractionError::Timeout(deadline.seconds))
                }
                Some(left) => left.min(POLL_SLICE),
                None => POLL_SLICE,
            };
            let millis = u16::try_from(slice.as_millis().max(1)).unwrap_or(u16::MAX);

            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) | Err(Errno::EINTR) => {}
                Ok(_) => return Ok(()),
                Err(e) => {
                    return Err(InteractionError::UiError(format!(
                        "Failed to wait for terminal: {}",
                        e
                    )))
                }
            }
        }
    }
}

/// Restores the settings captured by [`Terminal::hide_input`].
pub(super) struct EchoGuard<'a> {
    file: &'a File,
    original: Option<Termios>,
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        if let Some(original) = &self.original {
            if let Err(e) = termios::tcsetattr(self.file, SetArg::TCSANOW, original) {
                warn!(error = %e, "Failed to restore terminal echo");
            }
        }
    }
}
