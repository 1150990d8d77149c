//! Trait definitions for pluggable interaction providers.
//!
//! The interpreter never talks to a human itself. It hands the prompt
//! configuration (and, for GETPIN, the secure secret buffer) to an
//! [`InteractionProvider`], so it can be tested with scripted providers and
//! different front ends can be swapped in.

use std::future::Future;
use std::pin::Pin;

use tracing::warn;

use crate::secmem::{SecureBuffer, SecureMemory};
use crate::session::PromptConfig;

/// Boxed future returned by [`InteractionProvider`] methods.
pub type InteractionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InteractionError>> + Send + 'a>>;

/// Error type for interaction providers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteractionError {
    /// User cancelled the prompt.
    #[error("prompt cancelled by user")]
    Cancelled,

    /// Prompt timed out.
    #[error("prompt timed out after {0} seconds")]
    Timeout(u64),

    /// The secret did not fit into secure memory.
    #[error("secure memory exhausted")]
    OutOfMemory,

    /// Failed to initialize the front end.
    #[error("UI initialization failed: {0}")]
    InitializationFailed(String),

    /// Generic UI error.
    #[error("UI error: {0}")]
    UiError(String),
}

/// A single GETPIN handed to a provider.
///
/// Wraps the session's secret slot. The provider writes the secret into
/// [`buffer_mut`](Self::buffer_mut) (or uses [`set_pin`](Self::set_pin)) and
/// reports how many bytes it wrote. When the request is dropped the slot is
/// emptied and the buffer zeroed, whatever the outcome.
pub struct PinRequest<'a> {
    config: &'a PromptConfig,
    memory: &'a SecureMemory,
    secret: &'a mut Option<SecureBuffer>,
    max_len: usize,
}

impl<'a> PinRequest<'a> {
    pub(crate) fn new(
        config: &'a PromptConfig,
        memory: &'a SecureMemory,
        secret: &'a mut Option<SecureBuffer>,
        max_len: usize,
    ) -> Self {
        Self {
            config,
            memory,
            secret,
            max_len,
        }
    }

    /// The prompt configuration for this request.
    pub fn config(&self) -> &PromptConfig {
        self.config
    }

    /// The pool the secret buffer is drawn from.
    ///
    /// Providers that stage input before [`set_pin`](Self::set_pin) allocate
    /// from here so the staged copy is locked and counted too.
    pub fn memory(&self) -> &SecureMemory {
        self.memory
    }

    /// The label to show next to the entry field.
    ///
    /// This is the configured prompt, or `PIN:` when none was set.
    pub fn prompt(&self) -> &str {
        self.config.effective_prompt()
    }

    /// Current buffer capacity, 0 once the buffer was released.
    pub fn capacity(&self) -> usize {
        self.secret.as_ref().map_or(0, SecureBuffer::capacity)
    }

    /// The growth ceiling for the buffer.
    pub fn max_length(&self) -> usize {
        self.max_len
    }

    /// Whether the buffer was released after a failed growth.
    pub fn is_released(&self) -> bool {
        self.secret.is_none()
    }

    /// The secret buffer, if it was not released.
    pub fn buffer_mut(&mut self) -> Option<&mut SecureBuffer> {
        self.secret.as_mut()
    }

    /// Grow the buffer so at least `min` bytes fit.
    ///
    /// On failure the buffer is released entirely and the request can no
    /// longer succeed.
    pub fn grow(&mut self, min: usize) -> Result<usize, InteractionError> {
        let Some(buffer) = self.secret.as_mut() else {
            return Err(InteractionError::OutOfMemory);
        };

        match buffer.grow(min, self.max_len) {
            Ok(capacity) => Ok(capacity),
            Err(err) => {
                warn!(error = %err, "Failed to grow secret buffer, releasing it");
                *self.secret = None;
                Err(InteractionError::OutOfMemory)
            }
        }
    }

    /// Store `pin` as the secret, growing the buffer if needed.
    ///
    /// Returns the number of bytes written.
    pub fn set_pin(&mut self, pin: &[u8]) -> Result<usize, InteractionError> {
        self.grow(pin.len())?;
        let buffer = self
            .secret
            .as_mut()
            .ok_or(InteractionError::OutOfMemory)?;
        buffer.clear();
        buffer
            .extend_from_slice(pin)
            .map_err(|_| InteractionError::OutOfMemory)?;
        Ok(pin.len())
    }

    /// The first `len` bytes of the buffer, as reported by a provider.
    ///
    /// Returns `None` if the buffer was released or `len` exceeds its
    /// capacity.
    pub fn secret(&mut self, len: usize) -> Option<&[u8]> {
        let buffer = self.secret.as_mut()?;
        buffer.set_len(len).ok()?;
        Some(buffer.as_bytes())
    }
}

impl Drop for PinRequest<'_> {
    fn drop(&mut self) {
        // Dropping the buffer zeroes it and returns it to the pool.
        self.secret.take();
    }
}

impl std::fmt::Debug for PinRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRequest")
            .field("prompt", &self.prompt())
            .field("capacity", &self.capacity())
            .field("max_len", &self.max_len)
            .finish()
    }
}

/// Trait for interaction provider implementations.
///
/// # Example (Mock Implementation)
///
/// ```ignore
/// struct FixedPin;
///
/// impl InteractionProvider for FixedPin {
///     fn get_pin<'a>(&'a self, request: &'a mut PinRequest<'_>) -> InteractionFuture<'a, usize> {
///         Box::pin(async move { request.set_pin(b"1234") })
///     }
///
///     fn confirm<'a>(&'a self, _config: &'a PromptConfig) -> InteractionFuture<'a, bool> {
///         Box::pin(async { Ok(true) })
///     }
/// }
/// ```
pub trait InteractionProvider: Send + Sync {
    /// Ask the user for a secret.
    ///
    /// # Returns
    ///
    /// The number of secret bytes written into the request's buffer.
    ///
    /// # Errors
    ///
    /// Returns `InteractionError::Cancelled` if the user cancels.
    /// Returns `InteractionError::Timeout` if the prompt times out.
    /// Returns `InteractionError::OutOfMemory` if the secret did not fit.
    fn get_pin<'a>(&'a self, request: &'a mut PinRequest<'_>) -> InteractionFuture<'a, usize>;

    /// Ask the user a yes/no question described by `config`.
    fn confirm<'a>(&'a self, config: &'a PromptConfig) -> InteractionFuture<'a, bool>;
}
