//! Core types and utilities for secure-pinentry.
//!
//! This crate provides the building blocks of the PIN entry server: the line
//! protocol, per-session state and the secure memory secrets live in. It is
//! intentionally UI-agnostic to allow:
//!
//! - Security audits to focus on core modules
//! - Unit tests without a display server or terminal
//! - Different front ends behind [`InteractionProvider`]
//!
//! # Modules
//!
//! - [`secmem`]: Locked, zero-on-release buffers drawn from a bounded pool
//! - [`escape`]: `%HH` decoding of arguments and data-line escaping
//! - [`codec`]: Conversion between UTF-8 and locale encodings
//! - [`session`]: Prompt configuration and the session's secret slot
//! - [`protocol`]: Line reader, command table, options and responses
//! - [`traits`]: The [`InteractionProvider`] trait and [`PinRequest`]
//!
//! # Example
//!
//! ```
//! use secure_pinentry_core::protocol::{Command, CommandKind};
//! use secure_pinentry_core::session::{SessionState, TextField};
//!
//! let mut session = SessionState::default();
//! let command = Command::parse(b"SETDESC Unlock%20key").unwrap().unwrap();
//! assert_eq!(command.kind, CommandKind::SetDesc);
//!
//! session.set_text(TextField::Description, command.argument).unwrap();
//! assert_eq!(session.config().description.as_deref(), Some("Unlock key"));
//! ```

pub mod codec;
pub mod escape;
pub mod protocol;
pub mod secmem;
pub mod session;
pub mod traits;

// Re-export commonly used types at the crate root for convenience
pub use codec::{from_canonical, locale_codeset, to_canonical, CodecError, CodecOutput};
pub use protocol::{
    Command, CommandError, CommandKind, ErrorCode, LineRead, LineReader, ProtocolError,
    ResponseWriter, SessionOption,
};
pub use secmem::{SecMemError, SecureBuffer, SecureMemory};
pub use session::{PromptConfig, SessionState, TextField};
pub use traits::{InteractionError, InteractionFuture, InteractionProvider, PinRequest};
