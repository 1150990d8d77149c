//! Terminal interaction provider.
//!
//! This module provides a terminal-based prompt on the caller's terminal:
//! the `ttyname` option, or the controlling terminal when none was given.
//! Texts are converted to the terminal's encoding, taken from the
//! `lc-ctype` option, before they are written.
//!
//! The secret is read with echo off straight into secure memory, then
//! converted from the terminal's encoding to UTF-8 into another secure
//! buffer before it is stored in the request.

use std::path::{Path, PathBuf};

use secure_pinentry_core::codec::{from_canonical, to_canonical, CodecError, CodecOutput};
use secure_pinentry_core::{
    InteractionError, InteractionFuture, InteractionProvider, PinRequest, PromptConfig,
    SecureBuffer, SecureMemory,
};
use tracing::debug;

use super::terminal::{run_blocking, CancelFlag, Deadline, Terminal};

/// The controlling terminal of the process.
pub const CONTROLLING_TTY: &str = "/dev/tty";

const DEFAULT_OK: &str = "OK";
const DEFAULT_CANCEL: &str = "Cancel";

/// Longest yes/no answer kept; the rest of the line is read and dropped.
const MAX_ANSWER_LENGTH: usize = 64;

/// Terminal-based interaction provider.
///
/// Talks to a terminal device rather than stdin and stdout, since those
/// carry the protocol.
pub struct TtyProvider {
    device: PathBuf,
}

impl TtyProvider {
    /// Create a provider that falls back to the controlling terminal.
    pub fn new() -> Self {
        Self {
            device: PathBuf::from(CONTROLLING_TTY),
        }
    }

    /// The device used when the caller named no terminal.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// The device to prompt on for `config`.
    fn device_for(&self, config: &PromptConfig) -> PathBuf {
        match config.tty_name.as_deref() {
            Some(name) if !name.is_empty() => PathBuf::from(name),
            _ => self.device.clone(),
        }
    }
}

impl Default for TtyProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Lay out the error and description above a final question line.
fn compose(config: &PromptConfig, question: &str) -> String {
    let mut text = String::new();
    if let Some(error) = config.error.as_deref() {
        text.push_str("!! ");
        text.push_str(error);
        text.push('\n');
    }
    if let Some(description) = config.description.as_deref() {
        text.push_str(description);
        text.push('\n');
    }
    text.push_str(question);
    text.push(' ');
    text
}

/// Text shown before reading a secret.
fn pin_prompt_text(config: &PromptConfig, label: &str) -> String {
    compose(config, label)
}

/// Text shown before reading a yes/no answer.
fn confirm_text(config: &PromptConfig) -> String {
    let ok = config.ok.as_deref().unwrap_or(DEFAULT_OK);
    let cancel = config.cancel.as_deref().unwrap_or(DEFAULT_CANCEL);
    compose(config, &format!("[y] {} / [N] {}?", ok, cancel))
}

/// Whether a typed answer means yes.
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Convert `text` to the terminal's encoding.
fn encode_for_terminal(config: &PromptConfig, text: &str) -> Result<Vec<u8>, InteractionError> {
    let output = from_canonical(config.lc_ctype.as_deref(), text.as_bytes(), None)
        .map_err(|e| InteractionError::UiError(format!("Failed to convert prompt text: {}", e)))?;
    Ok(output.as_bytes().to_vec())
}

/// Read a hidden line into a buffer from `memory`, growing it up to `max`.
fn read_secret(
    terminal: &Terminal,
    memory: &SecureMemory,
    capacity: usize,
    max: usize,
    deadline: Deadline,
    cancel: &CancelFlag,
) -> Result<SecureBuffer, InteractionError> {
    let mut buffer = memory
        .allocate(capacity)
        .map_err(|_| InteractionError::OutOfMemory)?;

    let _hidden = terminal.hide_input()?;
    terminal.read_line(deadline, cancel, |byte| {
        if buffer.len() == buffer.capacity() {
            buffer
                .grow(buffer.len() + 1, max)
                .map_err(|_| InteractionError::OutOfMemory)?;
        }
        buffer
            .extend_from_slice(&[byte])
            .map_err(|_| InteractionError::OutOfMemory)
    })?;

    Ok(buffer)
}

/// Convert a secret typed in the terminal's encoding to UTF-8 in secure memory.
fn secret_to_canonical(
    config: &PromptConfig,
    typed: &[u8],
    memory: &SecureMemory,
) -> Result<CodecOutput, InteractionError> {
    to_canonical(config.lc_ctype.as_deref(), typed, Some(memory)).map_err(|e| match e {
        CodecError::SecureMemory(_) | CodecError::OutOfMemory | CodecError::TooLarge => {
            InteractionError::OutOfMemory
        }
        other => InteractionError::UiError(format!("Failed to convert secret: {}", other)),
    })
}

impl InteractionProvider for TtyProvider {
    fn get_pin<'a>(&'a self, request: &'a mut PinRequest<'_>) -> InteractionFuture<'a, usize> {
        Box::pin(async move {
            let config = request.config().clone();
            let text = encode_for_terminal(&config, &pin_prompt_text(&config, request.prompt()))?;
            let device = self.device_for(&config);
            let memory = request.memory().clone();
            let (capacity, max) = (request.capacity(), request.max_length());
            let deadline = Deadline::start(&config);

            let typed = run_blocking({
                let memory = memory.clone();
                move |cancel: &CancelFlag| {
                    let terminal = Terminal::open(&device)?;
                    terminal.write_text(&text)?;
                    read_secret(&terminal, &memory, capacity, max, deadline, cancel)
                }
            })
            .await?;
            debug!("Secret entered on terminal");

            let pin = secret_to_canonical(&config, typed.as_bytes(), &memory)?;
            drop(typed);
            request.set_pin(pin.as_bytes())
        })
    }

    fn confirm<'a>(&'a self, config: &'a PromptConfig) -> InteractionFuture<'a, bool> {
        Box::pin(async move {
            let text = encode_for_terminal(config, &confirm_text(config))?;
            let device = self.device_for(config);
            let deadline = Deadline::start(config);

            run_blocking(move |cancel| {
                let terminal = Terminal::open(&device)?;
                terminal.write_text(&text)?;

                let mut answer = Vec::new();
                terminal.read_line(deadline, cancel, |byte| {
                    if answer.len() < MAX_ANSWER_LENGTH {
                        answer.push(byte);
                    }
                    Ok(())
                })?;
                Ok(is_affirmative(&String::from_utf8_lossy(&answer)))
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn socket_terminal() -> (Terminal, UnixStream) {
        let (ours, peer) = UnixStream::pair().unwrap();
        (Terminal::from_file(File::from(OwnedFd::from(ours))), peer)
    }

    fn no_deadline() -> Deadline {
        Deadline::start(&PromptConfig::default())
    }

    #[test]
    fn can_create_tty_provider() {
        let provider = TtyProvider::new();
        assert_eq!(provider.device(), Path::new("/dev/tty"));
    }

    #[test]
    fn ttyname_selects_device() {
        let provider = TtyProvider::new();
        let config = PromptConfig {
            tty_name: Some("/dev/pts/7".into()),
            ..PromptConfig::default()
        };
        assert_eq!(provider.device_for(&config), Path::new("/dev/pts/7"));

        let unnamed = PromptConfig {
            tty_name: Some(String::new()),
            ..PromptConfig::default()
        };
        assert_eq!(provider.device_for(&unnamed), Path::new("/dev/tty"));
        assert_eq!(
            provider.device_for(&PromptConfig::default()),
            Path::new("/dev/tty")
        );
    }

    #[test]
    fn pin_prompt_shows_error_and_description() {
        let config = PromptConfig {
            description: Some("Unlock card 42".into()),
            error: Some("Bad PIN".into()),
            ..PromptConfig::default()
        };
        assert_eq!(
            pin_prompt_text(&config, "PIN:"),
            "!! Bad PIN\nUnlock card 42\nPIN: "
        );
    }

    #[test]
    fn pin_prompt_without_texts() {
        let config = PromptConfig::default();
        assert_eq!(pin_prompt_text(&config, "Passphrase:"), "Passphrase: ");
    }

    #[test]
    fn confirm_uses_button_labels() {
        let config = PromptConfig {
            description: Some("Trust this key?".into()),
            ok: Some("Trust".into()),
            ..PromptConfig::default()
        };
        assert_eq!(
            confirm_text(&config),
            "Trust this key?\n[y] Trust / [N] Cancel? "
        );
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("yep"));
    }

    #[test]
    fn text_is_encoded_for_terminal() {
        let config = PromptConfig {
            lc_ctype: Some("de_DE.ISO-8859-1".into()),
            ..PromptConfig::default()
        };
        assert_eq!(encode_for_terminal(&config, "Größe").unwrap(), b"Gr\xf6\xdfe");

        let plain = PromptConfig::default();
        assert_eq!(encode_for_terminal(&plain, "Größe").unwrap(), "Größe".as_bytes());
    }

    #[test]
    fn unmappable_text_is_a_ui_error() {
        let config = PromptConfig {
            lc_ctype: Some("C".into()),
            ..PromptConfig::default()
        };
        assert!(matches!(
            encode_for_terminal(&config, "Größe"),
            Err(InteractionError::UiError(_))
        ));
    }

    #[test]
    fn secret_is_read_into_secure_memory() {
        let (terminal, mut peer) = socket_terminal();
        peer.write_all(b"1234\n").unwrap();
        let memory = SecureMemory::new(1024);

        let typed = read_secret(&terminal, &memory, 16, 64, no_deadline(), &CancelFlag::default())
            .unwrap();
        assert_eq!(typed.as_bytes(), b"1234");
        assert_eq!(memory.in_use(), 16);

        drop(typed);
        assert_eq!(memory.in_use(), 0);
    }

    #[test]
    fn long_secret_grows_staging_buffer() {
        let (terminal, mut peer) = socket_terminal();
        peer.write_all(&[b'9'; 40]).unwrap();
        peer.write_all(b"\n").unwrap();
        let memory = SecureMemory::new(1024);

        let typed = read_secret(&terminal, &memory, 16, 128, no_deadline(), &CancelFlag::default())
            .unwrap();
        assert_eq!(typed.as_bytes(), &[b'9'; 40][..]);
        assert_eq!(typed.capacity(), 64);
    }

    #[test]
    fn secret_beyond_max_length_is_out_of_memory() {
        let (terminal, mut peer) = socket_terminal();
        peer.write_all(&[b'9'; 20]).unwrap();
        peer.write_all(b"\n").unwrap();
        let memory = SecureMemory::new(1024);

        let result = read_secret(&terminal, &memory, 8, 16, no_deadline(), &CancelFlag::default());
        assert!(matches!(result, Err(InteractionError::OutOfMemory)));
        assert_eq!(memory.in_use(), 0);
    }

    #[test]
    fn latin1_secret_is_converted_in_secure_memory() {
        let (terminal, mut peer) = socket_terminal();
        peer.write_all(b"Gr\xfc\xdfe\n").unwrap();
        let memory = SecureMemory::new(1024);
        let config = PromptConfig {
            lc_ctype: Some("de_DE.ISO-8859-1".into()),
            ..PromptConfig::default()
        };

        let typed = read_secret(&terminal, &memory, 16, 64, no_deadline(), &CancelFlag::default())
            .unwrap();
        let pin = secret_to_canonical(&config, typed.as_bytes(), &memory).unwrap();
        assert!(pin.is_secure());
        assert_eq!(pin.as_bytes(), "Grüße".as_bytes());

        drop(typed);
        drop(pin);
        assert_eq!(memory.in_use(), 0);
        assert_eq!(memory.live_buffers(), 0);
    }

    #[test]
    fn utf8_secret_passes_through() {
        let memory = SecureMemory::new(64);
        let pin = secret_to_canonical(&PromptConfig::default(), "pässword".as_bytes(), &memory)
            .unwrap();
        assert!(pin.is_secure());
        assert_eq!(pin.as_bytes(), "pässword".as_bytes());
    }

    #[test]
    fn invalid_secret_encoding_is_a_ui_error() {
        let memory = SecureMemory::new(64);
        let config = PromptConfig {
            lc_ctype: Some("en_US.UTF-8".into()),
            ..PromptConfig::default()
        };
        assert!(matches!(
            secret_to_canonical(&config, &[0xc3, 0x28], &memory),
            Err(InteractionError::UiError(_))
        ));
        assert_eq!(memory.in_use(), 0);
    }

    #[test]
    fn exhausted_pool_while_converting_is_out_of_memory() {
        let memory = SecureMemory::new(4);
        let config = PromptConfig {
            lc_ctype: Some("ISO-8859-1".into()),
            ..PromptConfig::default()
        };
        assert_eq!(
            secret_to_canonical(&config, b"\xfc\xfc\xfc", &memory).map(|_| ()),
            Err(InteractionError::OutOfMemory)
        );
    }

    #[tokio::test]
    async fn missing_device_fails_to_initialize() {
        let provider = TtyProvider::new();
        let config = PromptConfig {
            tty_name: Some("/nonexistent/tty".into()),
            ..PromptConfig::default()
        };
        assert!(matches!(
            provider.confirm(&config).await,
            Err(InteractionError::InitializationFailed(_))
        ));
    }
}
