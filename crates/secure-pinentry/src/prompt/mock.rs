//! Mock interaction provider for testing.
//!
//! This module provides a scripted implementation of [`InteractionProvider`]
//! that can be used in tests without a terminal or display server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use secure_pinentry_core::{
    InteractionError, InteractionFuture, InteractionProvider, PinRequest, PromptConfig,
};

/// One scripted reply of a [`MockProvider`].
#[derive(Debug)]
pub enum MockReply {
    /// GETPIN: store this secret.
    Pin(SecretString),
    /// GETPIN: report `len` bytes without writing anything.
    ReportLength(usize),
    /// CONFIRM: answer yes or no.
    Confirm(bool),
    /// Either: fail with this error.
    Error(InteractionError),
}

/// Which provider method was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    GetPin,
    Confirm,
}

/// What the provider saw on one call.
#[derive(Debug, Clone)]
pub struct ObservedCall {
    /// The method called.
    pub kind: CallKind,
    /// The configuration passed in.
    pub config: PromptConfig,
    /// The label a real front end would have shown.
    pub prompt: String,
}

/// A mock interaction provider for testing.
///
/// Replies are consumed in order, one per call. A call with no reply left
/// fails with [`InteractionError::UiError`].
///
/// # Example
///
/// ```
/// use secure_pinentry::prompt::MockProvider;
/// use secure_pinentry_core::InteractionError;
///
/// // Answer the first GETPIN with a secret, then cancel the next one
/// let mock = MockProvider::with_pin("1234").then_error(InteractionError::Cancelled);
///
/// // Or answer CONFIRM with "no"
/// let mock_no = MockProvider::confirming(false);
/// ```
pub struct MockProvider {
    /// Replies still to be given.
    replies: Mutex<VecDeque<MockReply>>,
    /// Everything the provider was asked.
    calls: Mutex<Vec<ObservedCall>>,
    /// Number of times the provider was called.
    call_count: AtomicUsize,
    /// Delay before responding (for timeout testing).
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a mock with an empty script.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Create a mock that returns the given secret.
    pub fn with_pin(pin: impl Into<String>) -> Self {
        Self::new().then_pin(pin)
    }

    /// Create a mock that answers CONFIRM.
    pub fn confirming(answer: bool) -> Self {
        Self::new().then_confirm(answer)
    }

    /// Create a mock that simulates user cancellation.
    pub fn cancelled() -> Self {
        Self::with_error(InteractionError::Cancelled)
    }

    /// Create a mock that simulates timeout.
    pub fn timeout(seconds: u64) -> Self {
        Self::with_error(InteractionError::Timeout(seconds))
    }

    /// Create a mock that returns an error.
    pub fn with_error(error: InteractionError) -> Self {
        Self::new().then_error(error)
    }

    /// Append a secret to the script.
    pub fn then_pin(self, pin: impl Into<String>) -> Self {
        self.then(MockReply::Pin(SecretString::from(pin.into())))
    }

    /// Append a CONFIRM answer to the script.
    pub fn then_confirm(self, answer: bool) -> Self {
        self.then(MockReply::Confirm(answer))
    }

    /// Append an error to the script.
    pub fn then_error(self, error: InteractionError) -> Self {
        self.then(MockReply::Error(error))
    }

    /// Append any reply to the script.
    pub fn then(self, reply: MockReply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Add a delay before responding (useful for timeout testing).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times the provider was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Everything the provider was asked so far, oldest first.
    pub fn calls(&self) -> Vec<ObservedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of scripted replies not yet used.
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_reply(&self, kind: CallKind, config: &PromptConfig) -> Option<MockReply> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ObservedCall {
                kind,
                config: config.clone(),
                prompt: config.effective_prompt().to_string(),
            });
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::with_pin("mock-pin")
    }
}

fn unexpected(reply: Option<MockReply>, call: &str) -> InteractionError {
    match reply {
        None => InteractionError::UiError(format!("no scripted reply for {}", call)),
        Some(other) => InteractionError::UiError(format!("unexpected reply {:?} for {}", other, call)),
    }
}

impl InteractionProvider for MockProvider {
    fn get_pin<'a>(&'a self, request: &'a mut PinRequest<'_>) -> InteractionFuture<'a, usize> {
        let reply = self.next_reply(CallKind::GetPin, request.config());
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match reply {
                Some(MockReply::Pin(pin)) => request.set_pin(pin.expose_secret().as_bytes()),
                Some(MockReply::ReportLength(len)) => Ok(len),
                Some(MockReply::Error(err)) => Err(err),
                other => Err(unexpected(other, "GETPIN")),
            }
        })
    }

    fn confirm<'a>(&'a self, config: &'a PromptConfig) -> InteractionFuture<'a, bool> {
        let reply = self.next_reply(CallKind::Confirm, config);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match reply {
                Some(MockReply::Confirm(answer)) => Ok(answer),
                Some(MockReply::Error(err)) => Err(err),
                other => Err(unexpected(other, "CONFIRM")),
            }
        })
    }
}
