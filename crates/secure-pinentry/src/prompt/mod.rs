//! Interaction provider implementations.
//!
//! This module provides implementations of the [`InteractionProvider`] trait:
//!
//! - [`TtyProvider`]: Terminal prompt on the caller's tty (production)
//! - [`MockProvider`]: Scripted mock for testing
//!
//! Both implement the [`InteractionProvider`] trait from `secure-pinentry-core`.
//!
//! [`InteractionProvider`]: secure_pinentry_core::InteractionProvider

mod mock;
mod terminal;
mod tty;

pub use mock::{CallKind, MockProvider, MockReply, ObservedCall};
pub use tty::TtyProvider;
