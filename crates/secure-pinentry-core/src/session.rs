//! Per-session prompt configuration and secret buffer ownership.
//!
//! A process serves exactly one conversation, so there is exactly one
//! [`SessionState`]. It is owned by the command interpreter and handed to
//! command handlers by reference.

use std::time::Duration;

use tracing::debug;

use crate::escape;
use crate::protocol::{CommandError, SessionOption};
use crate::secmem::{SecureBuffer, SecureMemory};
use crate::traits::PinRequest;

/// Initial capacity of the secret buffer allocated for each GETPIN.
pub const DEFAULT_PIN_LENGTH: usize = 2048;

/// Default ceiling for secret buffer growth.
pub const DEFAULT_MAX_PIN_LENGTH: usize = 8192;

/// Prompt label shown when the caller never set one.
pub const DEFAULT_PROMPT: &str = "PIN:";

/// The user-visible texts settable with the `SET*` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    /// Longer explanation shown above the entry field (`SETDESC`).
    Description,
    /// Error from a previous attempt (`SETERROR`).
    Error,
    /// Label next to the entry field (`SETPROMPT`).
    Prompt,
    /// Text of the accept button (`SETOK`).
    Ok,
    /// Text of the cancel button (`SETCANCEL`).
    Cancel,
}

impl std::fmt::Display for TextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextField::Description => write!(f, "description"),
            TextField::Error => write!(f, "error"),
            TextField::Prompt => write!(f, "prompt"),
            TextField::Ok => write!(f, "ok"),
            TextField::Cancel => write!(f, "cancel"),
        }
    }
}

/// Configuration for a prompt, as seen by an interaction provider.
///
/// Texts are UTF-8. Everything except the texts is forwarded from the
/// `OPTION` command or the process arguments without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConfig {
    /// Description text.
    pub description: Option<String>,
    /// Error text; cleared after every interaction.
    pub error: Option<String>,
    /// Prompt label.
    pub prompt: Option<String>,
    /// Accept button label.
    pub ok: Option<String>,
    /// Cancel button label.
    pub cancel: Option<String>,

    /// Display to show the prompt on.
    pub display: Option<String>,
    /// Terminal device name.
    pub tty_name: Option<String>,
    /// Terminal type.
    pub tty_type: Option<String>,
    /// Locale naming the terminal's character encoding.
    pub lc_ctype: Option<String>,
    /// Locale for messages.
    pub lc_messages: Option<String>,

    /// Grab the keyboard while the prompt is shown.
    pub grab: bool,
    /// Ask for additional settings along with the secret.
    pub enhanced: bool,
    /// Window the prompt should be placed over.
    pub parent_wid: u64,
    /// Debug mode requested by the caller.
    pub debug: bool,
    /// Seconds to wait for the user, 0 for no limit.
    pub timeout: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            description: None,
            error: None,
            prompt: None,
            ok: None,
            cancel: None,
            display: None,
            tty_name: None,
            tty_type: None,
            lc_ctype: None,
            lc_messages: None,
            grab: true,
            enhanced: false,
            parent_wid: 0,
            debug: false,
            timeout: 0,
        }
    }
}

impl PromptConfig {
    /// Get one of the settable texts.
    pub fn text(&self, field: TextField) -> Option<&str> {
        match field {
            TextField::Description => self.description.as_deref(),
            TextField::Error => self.error.as_deref(),
            TextField::Prompt => self.prompt.as_deref(),
            TextField::Ok => self.ok.as_deref(),
            TextField::Cancel => self.cancel.as_deref(),
        }
    }

    fn text_slot(&mut self, field: TextField) -> &mut Option<String> {
        match field {
            TextField::Description => &mut self.description,
            TextField::Error => &mut self.error,
            TextField::Prompt => &mut self.prompt,
            TextField::Ok => &mut self.ok,
            TextField::Cancel => &mut self.cancel,
        }
    }

    /// The prompt label to show, falling back to [`DEFAULT_PROMPT`].
    pub fn effective_prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }

    /// The interaction timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

/// State of the single conversation served by this process.
///
/// The secret slot is only filled while a [`PinRequest`] is alive, and the
/// request empties it when dropped.
pub struct SessionState {
    config: PromptConfig,
    secret: Option<SecureBuffer>,
    memory: SecureMemory,
    pin_length: usize,
    pin_max_length: usize,
}

impl SessionState {
    /// Create a session with the given starting configuration.
    pub fn new(config: PromptConfig, memory: SecureMemory) -> Self {
        Self {
            config,
            secret: None,
            memory,
            pin_length: DEFAULT_PIN_LENGTH,
            pin_max_length: DEFAULT_MAX_PIN_LENGTH,
        }
    }

    /// Override the initial secret buffer capacity and its growth ceiling.
    ///
    /// The ceiling is raised to the initial capacity if it is lower.
    pub fn with_pin_limits(mut self, pin_length: usize, pin_max_length: usize) -> Self {
        self.pin_length = pin_length;
        self.pin_max_length = pin_max_length.max(pin_length);
        self
    }

    /// The current prompt configuration.
    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// The secure memory pool secrets are drawn from.
    pub fn memory(&self) -> &SecureMemory {
        &self.memory
    }

    /// Initial capacity of the secret buffer.
    pub fn pin_length(&self) -> usize {
        self.pin_length
    }

    /// Growth ceiling of the secret buffer.
    pub fn pin_max_length(&self) -> usize {
        self.pin_max_length
    }

    /// Whether a secret buffer is currently live.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Replace one of the texts with the escape-decoded `argument`.
    ///
    /// On allocation failure the previous value is kept. Byte sequences that
    /// are not UTF-8 are replaced with U+FFFD.
    pub fn set_text(&mut self, field: TextField, argument: &[u8]) -> Result<(), CommandError> {
        let mut decoded = Vec::new();
        decoded
            .try_reserve_exact(argument.len())
            .map_err(|_| CommandError::OutOfMemory)?;
        escape::decode_into(argument, &mut decoded);

        let text = match String::from_utf8(decoded) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };

        *self.config.text_slot(field) = Some(text);
        debug!(field = %field, "Updated prompt text");
        Ok(())
    }

    /// Forget the error text.
    pub fn clear_error(&mut self) {
        self.config.error = None;
    }

    /// Apply a parsed `OPTION`.
    ///
    /// `debug-wait` has no effect on the session and is ignored here.
    pub fn apply_option(&mut self, option: SessionOption) {
        let config = &mut self.config;
        match option {
            SessionOption::Grab(grab) => config.grab = grab,
            SessionOption::DebugWait(_) => {}
            SessionOption::Display(value) => config.display = Some(value),
            SessionOption::TtyName(value) => config.tty_name = Some(value),
            SessionOption::TtyType(value) => config.tty_type = Some(value),
            SessionOption::LcCtype(value) => config.lc_ctype = Some(value),
            SessionOption::LcMessages(value) => config.lc_messages = Some(value),
            SessionOption::ParentWid(wid) => config.parent_wid = wid,
            SessionOption::Timeout(secs) => config.timeout = secs,
        }
    }

    /// Allocate the secret buffer and wrap it in a request for a provider.
    ///
    /// The buffer is released, zeroed, when the returned request is dropped.
    pub fn begin_pin_request(&mut self) -> Result<PinRequest<'_>, CommandError> {
        if self.secret.is_some() {
            return Err(CommandError::Failed("secret buffer already in use".into()));
        }

        let buffer = self
            .memory
            .allocate(self.pin_length)
            .map_err(|_| CommandError::OutOfMemory)?;
        self.secret = Some(buffer);

        Ok(PinRequest::new(
            &self.config,
            &self.memory,
            &mut self.secret,
            self.pin_max_length,
        ))
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(PromptConfig::default(), SecureMemory::default())
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("config", &self.config)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("memory", &self.memory)
            .field("pin_length", &self.pin_length)
            .field("pin_max_length", &self.pin_max_length)
            .finish()
    }
}
