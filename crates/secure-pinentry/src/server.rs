//! Command interpreter.
//!
//! This module provides the `Server` struct that drives one conversation:
//! - Reading command lines from the caller
//! - Updating the session's prompt configuration
//! - Asking the interaction provider for secrets and confirmations
//! - Answering every command with exactly one status line

use secure_pinentry_core::protocol::CommandKind;
use secure_pinentry_core::{
    Command, CommandError, ErrorCode, InteractionError, InteractionProvider, LineRead, LineReader,
    PinRequest, ProtocolError, ResponseWriter, SessionOption, SessionState,
};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Whether to keep reading commands after one was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The command interpreter.
///
/// Owns the session state and the interaction provider. Commands are handled
/// strictly one after another; a provider call blocks the conversation until
/// it returns.
pub struct Server<P: InteractionProvider> {
    /// The state of the conversation.
    session: SessionState,
    /// The interaction provider implementation.
    provider: P,
}

impl<P: InteractionProvider> Server<P> {
    /// Create a new server with a default session.
    pub fn new(provider: P) -> Self {
        Self::with_session(provider, SessionState::default())
    }

    /// Create a new server with a prepared session.
    pub fn with_session(provider: P, session: SessionState) -> Self {
        Self { session, provider }
    }

    /// The session state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// The interaction provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Serve one conversation until the caller says BYE or closes the input.
    ///
    /// Only transport failures are returned as errors; everything else is
    /// answered with an `ERR` line.
    pub async fn run<R, W>(&mut self, reader: R, writer: W) -> Result<(), ProtocolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = LineReader::new(reader);
        let mut writer = ResponseWriter::new(writer);
        let mut line = Vec::new();

        writer.greeting().await?;

        loop {
            match reader.read_line(&mut line).await? {
                LineRead::Line => {}
                LineRead::TooLong => {
                    warn!("Discarded overlong line");
                    writer.err(ErrorCode::LineTooLong).await?;
                    continue;
                }
                LineRead::Unterminated => {
                    warn!("Input ended inside a line");
                    writer.err(ErrorCode::LineNotTerminated).await?;
                    return Ok(());
                }
                LineRead::Eof => {
                    debug!("Caller closed the connection");
                    return Ok(());
                }
            }

            match self.process_line(&line, &mut writer).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    debug!("Caller said goodbye");
                    return Ok(());
                }
                Err(CommandError::Transport(e)) => return Err(e),
                Err(e) => {
                    match &e {
                        CommandError::Canceled | CommandError::NotConfirmed => {
                            debug!(error = %e, "Interaction declined")
                        }
                        _ => warn!(error = %e, "Command failed"),
                    }
                    writer.err(e.code()).await?;
                }
            }
        }
    }

    /// Handle one command line, writing everything but a failure status.
    async fn process_line<W>(
        &mut self,
        line: &[u8],
        writer: &mut ResponseWriter<W>,
    ) -> Result<Flow, CommandError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(command) = Command::parse(line)? else {
            return Ok(Flow::Continue);
        };

        // Arguments may be sensitive, so only the keyword is logged
        debug!(command = %command.kind, "Processing command");

        if let Some(field) = command.kind.text_field() {
            self.session.set_text(field, command.argument)?;
            writer.ok().await?;
            return Ok(Flow::Continue);
        }

        match command.kind {
            CommandKind::GetPin => self.handle_getpin(writer).await?,
            CommandKind::Confirm => self.handle_confirm().await?,
            CommandKind::Option => self.handle_option(command.argument).await?,
            CommandKind::Bye => {
                writer.ok().await?;
                return Ok(Flow::Stop);
            }
            CommandKind::Nop | CommandKind::Reset => {}
            CommandKind::SetDesc
            | CommandKind::SetPrompt
            | CommandKind::SetError
            | CommandKind::SetOk
            | CommandKind::SetCancel => {}
        }

        writer.ok().await?;
        Ok(Flow::Continue)
    }

    /// Handle GETPIN: obtain a secret and send it as data lines.
    async fn handle_getpin<W>(&mut self, writer: &mut ResponseWriter<W>) -> Result<(), CommandError>
    where
        W: AsyncWrite + Unpin,
    {
        let result = {
            let mut request = self.session.begin_pin_request()?;
            debug!(prompt_set = request.config().prompt.is_some(), "Requesting secret");

            let outcome = match self.provider.get_pin(&mut request).await {
                Ok(len) => send_secret(&mut request, len, writer).await,
                Err(e) => Err(getpin_error(e)),
            };
            // Dropping the request zeroes and releases the buffer
            drop(request);
            outcome
        };

        self.session.clear_error();
        result
    }

    /// Handle CONFIRM: ask a yes/no question.
    async fn handle_confirm(&mut self) -> Result<(), CommandError> {
        let outcome = self.provider.confirm(self.session.config()).await;
        self.session.clear_error();

        match outcome {
            Ok(true) => {
                info!("Confirmed by user");
                Ok(())
            }
            Ok(false) | Err(InteractionError::Cancelled) | Err(InteractionError::Timeout(_)) => {
                Err(CommandError::NotConfirmed)
            }
            Err(e) => Err(CommandError::Failed(e.to_string())),
        }
    }

    /// Handle OPTION: parse and apply one session option.
    async fn handle_option(&mut self, argument: &[u8]) -> Result<(), CommandError> {
        let option = SessionOption::parse(argument)?;
        debug!(option = option.key(), "Setting option");

        if let SessionOption::DebugWait(wait) = option {
            warn!(
                pid = std::process::id(),
                secs = wait.as_secs(),
                "Waiting for debugger"
            );
            tokio::time::sleep(wait).await;
            warn!("okay");
        }

        self.session.apply_option(option);
        Ok(())
    }
}

/// Send the secret the provider reported as data lines followed by END.
async fn send_secret<W>(
    request: &mut PinRequest<'_>,
    len: usize,
    writer: &mut ResponseWriter<W>,
) -> Result<(), CommandError>
where
    W: AsyncWrite + Unpin,
{
    if request.is_released() {
        return Err(CommandError::OutOfMemory);
    }
    if len == 0 {
        debug!("Provider returned an empty secret");
        return Ok(());
    }

    let Some(secret) = request.secret(len) else {
        return Err(CommandError::Failed(
            "provider reported more bytes than the buffer holds".into(),
        ));
    };

    writer.data(secret).await?;
    writer.end().await?;
    info!("Secret returned to caller");
    Ok(())
}

fn getpin_error(error: InteractionError) -> CommandError {
    match error {
        InteractionError::Cancelled | InteractionError::Timeout(_) => CommandError::Canceled,
        InteractionError::OutOfMemory => CommandError::OutOfMemory,
        e => CommandError::Failed(e.to_string()),
    }
}
