//! Secure PIN entry server implementation.
//!
//! This crate provides the server process for secure-pinentry: the command
//! interpreter that talks to the caller over stdin/stdout, the interaction
//! providers that talk to the user, and the configuration file.
//!
//! Note: Inside the server, secrets only live in secure memory. The
//! interpreter hands the provider a [`PinRequest`] wrapping the session's
//! locked buffer, and writes the data lines from it through
//! [`UnbufferedStdout`], which does not stage them in a buffer of its own.
//! What the kernel and the caller do with the bytes afterwards is out of
//! reach.
//!
//! [`PinRequest`]: secure_pinentry_core::PinRequest

pub mod config;
pub mod prompt;
pub mod server;
pub mod stdio;

// Re-export main components
pub use config::{Config, ConfigError};
pub use prompt::{MockProvider, TtyProvider};
pub use server::Server;
pub use stdio::UnbufferedStdout;
