//! Line protocol spoken with the caller.
//!
//! The caller sends one command per LF-terminated line. The server answers
//! every command with exactly one status line, `OK [text]` or
//! `ERR <code> <description>`, optionally preceded by `D <data>` lines and an
//! `END` line.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroize;

use crate::escape::{data_escape, needs_data_escape};
use crate::session::TextField;

/// Longest accepted line, not counting the terminating LF.
pub const MAX_LINE_LENGTH: usize = 1000;

/// Text sent with the initial `OK` when a conversation starts.
pub const GREETING: &str = "Pleased to meet you";

/// Seconds `OPTION debug-wait` sleeps when no value is given.
pub const DEFAULT_DEBUG_WAIT: u64 = 5;

/// Error codes sent in `ERR` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Interaction failure.
    General,
    /// Allocation failure.
    OutOfCore,
    /// Unknown command keyword.
    UnknownCommand,
    /// Malformed command line.
    Syntax,
    /// Bad option value.
    Parameter,
    /// Line longer than [`MAX_LINE_LENGTH`].
    LineTooLong,
    /// Input ended inside a line.
    LineNotTerminated,
    /// User cancelled or the prompt timed out.
    Canceled,
    /// Unknown option key.
    InvalidOption,
    /// CONFIRM answered with no.
    NotConfirmed,
}

impl ErrorCode {
    /// Numeric code as sent on the wire.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::General => 1,
            ErrorCode::OutOfCore => 2,
            ErrorCode::UnknownCommand => 103,
            ErrorCode::Syntax => 104,
            ErrorCode::Parameter => 105,
            ErrorCode::LineTooLong => 107,
            ErrorCode::LineNotTerminated => 108,
            ErrorCode::Canceled => 111,
            ErrorCode::InvalidOption => 122,
            ErrorCode::NotConfirmed => 128,
        }
    }

    /// Description sent after the numeric code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::General => "General error",
            ErrorCode::OutOfCore => "Out of core",
            ErrorCode::UnknownCommand => "Unknown command",
            ErrorCode::Syntax => "Syntax error",
            ErrorCode::Parameter => "Parameter error",
            ErrorCode::LineTooLong => "Line too long",
            ErrorCode::LineNotTerminated => "Line not terminated",
            ErrorCode::Canceled => "Canceled",
            ErrorCode::InvalidOption => "Invalid option",
            ErrorCode::NotConfirmed => "Not confirmed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.description())
    }
}

/// Transport-level failure. Ends the conversation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to read from or write to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single command, answered with one `ERR` line.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Allocation failure.
    #[error("out of core")]
    OutOfMemory,

    /// Keyword not in the command table.
    #[error("unknown command")]
    UnknownCommand,

    /// Malformed line.
    #[error("syntax error: {0}")]
    Syntax(&'static str),

    /// Unknown option key.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Bad option value.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Interaction cancelled or timed out.
    #[error("canceled")]
    Canceled,

    /// CONFIRM was not confirmed.
    #[error("not confirmed")]
    NotConfirmed,

    /// Interaction failure.
    #[error("operation failed: {0}")]
    Failed(String),

    /// Transport failure while answering.
    #[error(transparent)]
    Transport(#[from] ProtocolError),
}

impl CommandError {
    /// The code to answer this error with.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::OutOfMemory => ErrorCode::OutOfCore,
            CommandError::UnknownCommand => ErrorCode::UnknownCommand,
            CommandError::Syntax(_) => ErrorCode::Syntax,
            CommandError::InvalidOption(_) => ErrorCode::InvalidOption,
            CommandError::Parameter(_) => ErrorCode::Parameter,
            CommandError::Canceled => ErrorCode::Canceled,
            CommandError::NotConfirmed => ErrorCode::NotConfirmed,
            CommandError::Failed(_) | CommandError::Transport(_) => ErrorCode::General,
        }
    }
}

/// Commands understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetDesc,
    SetPrompt,
    SetError,
    SetOk,
    SetCancel,
    GetPin,
    Confirm,
    Option,
    Nop,
    Reset,
    Bye,
}

const COMMANDS: &[(&str, CommandKind)] = &[
    ("SETDESC", CommandKind::SetDesc),
    ("SETPROMPT", CommandKind::SetPrompt),
    ("SETERROR", CommandKind::SetError),
    ("SETOK", CommandKind::SetOk),
    ("SETCANCEL", CommandKind::SetCancel),
    ("GETPIN", CommandKind::GetPin),
    ("CONFIRM", CommandKind::Confirm),
    ("OPTION", CommandKind::Option),
    ("NOP", CommandKind::Nop),
    ("RESET", CommandKind::Reset),
    ("BYE", CommandKind::Bye),
];

impl CommandKind {
    /// Look up a keyword. Matching is case-sensitive.
    pub fn lookup(keyword: &[u8]) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|(name, _)| name.as_bytes() == keyword)
            .map(|(_, kind)| *kind)
    }

    /// The keyword of this command.
    pub fn name(self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map_or("", |(name, _)| *name)
    }

    /// The text a `SET*` command replaces.
    pub fn text_field(self) -> Option<TextField> {
        match self {
            CommandKind::SetDesc => Some(TextField::Description),
            CommandKind::SetPrompt => Some(TextField::Prompt),
            CommandKind::SetError => Some(TextField::Error),
            CommandKind::SetOk => Some(TextField::Ok),
            CommandKind::SetCancel => Some(TextField::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn is_blank(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

fn is_blank_char(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// A command line split into keyword and argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// The command.
    pub kind: CommandKind,
    /// Everything after the whitespace following the keyword, verbatim.
    pub argument: &'a [u8],
}

impl<'a> Command<'a> {
    /// Parse a line without its terminator.
    ///
    /// Returns `Ok(None)` for comments and empty lines, which get no answer.
    pub fn parse(line: &'a [u8]) -> Result<Option<Self>, CommandError> {
        if line.is_empty() || line[0] == b'#' {
            return Ok(None);
        }

        let end = line.iter().position(|b| is_blank(*b)).unwrap_or(line.len());
        if end == 0 {
            return Err(CommandError::Syntax("leading white-space"));
        }

        let (keyword, rest) = line.split_at(end);
        let start = rest.iter().position(|b| !is_blank(*b)).unwrap_or(rest.len());
        let kind = CommandKind::lookup(keyword).ok_or(CommandError::UnknownCommand)?;

        Ok(Some(Command {
            kind,
            argument: &rest[start..],
        }))
    }
}

/// A parsed `OPTION` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOption {
    /// `grab` (true) or `no-grab` (false).
    Grab(bool),
    /// `debug-wait[=secs]`.
    DebugWait(Duration),
    /// `display=VALUE`.
    Display(String),
    /// `ttyname=VALUE`.
    TtyName(String),
    /// `ttytype=VALUE`.
    TtyType(String),
    /// `lc-ctype=VALUE`.
    LcCtype(String),
    /// `lc-messages=VALUE`.
    LcMessages(String),
    /// `parent-wid=N`.
    ParentWid(u64),
    /// `timeout=SECS`.
    Timeout(u64),
}

impl SessionOption {
    /// Parse the argument of an `OPTION` line.
    ///
    /// Accepts `key`, `key=value` and `key value`, with an optional leading
    /// `--` on the key.
    pub fn parse(argument: &[u8]) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(argument)
            .map_err(|_| CommandError::Parameter("option is not valid UTF-8".into()))?;

        let text = text.trim_start_matches(is_blank_char);
        if text.is_empty() {
            return Err(CommandError::Syntax("argument required"));
        }
        if text.starts_with('=') {
            return Err(CommandError::Syntax("no option name given"));
        }

        let key_end = text
            .find(|c: char| c == '=' || is_blank_char(c))
            .unwrap_or(text.len());
        let (key, rest) = text.split_at(key_end);

        let rest = rest.trim_start_matches(is_blank_char);
        let value = match rest.strip_prefix('=') {
            Some(value) => {
                let value = value.trim_matches(is_blank_char);
                if value.is_empty() {
                    return Err(CommandError::Syntax("option argument expected"));
                }
                value
            }
            None => rest.trim_end_matches(is_blank_char),
        };

        let key = match key.strip_prefix("--") {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => key,
        };
        if key.starts_with('-') {
            return Err(CommandError::Syntax("option should not begin with one dash"));
        }

        match key {
            "grab" | "no-grab" if !value.is_empty() => {
                Err(CommandError::InvalidOption(key.to_string()))
            }
            "grab" => Ok(SessionOption::Grab(true)),
            "no-grab" => Ok(SessionOption::Grab(false)),
            "debug-wait" => {
                let secs = if value.is_empty() {
                    DEFAULT_DEBUG_WAIT
                } else {
                    parse_number(key, value)?
                };
                Ok(SessionOption::DebugWait(Duration::from_secs(secs)))
            }
            "display" => Ok(SessionOption::Display(value.to_string())),
            "ttyname" => Ok(SessionOption::TtyName(value.to_string())),
            "ttytype" => Ok(SessionOption::TtyType(value.to_string())),
            "lc-ctype" => Ok(SessionOption::LcCtype(value.to_string())),
            "lc-messages" => Ok(SessionOption::LcMessages(value.to_string())),
            "parent-wid" => Ok(SessionOption::ParentWid(parse_number(key, value)?)),
            "timeout" => Ok(SessionOption::Timeout(parse_number(key, value)?)),
            _ => Err(CommandError::InvalidOption(key.to_string())),
        }
    }

    /// The option key, for logging. Values are not logged.
    pub fn key(&self) -> &'static str {
        match self {
            SessionOption::Grab(true) => "grab",
            SessionOption::Grab(false) => "no-grab",
            SessionOption::DebugWait(_) => "debug-wait",
            SessionOption::Display(_) => "display",
            SessionOption::TtyName(_) => "ttyname",
            SessionOption::TtyType(_) => "ttytype",
            SessionOption::LcCtype(_) => "lc-ctype",
            SessionOption::LcMessages(_) => "lc-messages",
            SessionOption::ParentWid(_) => "parent-wid",
            SessionOption::Timeout(_) => "timeout",
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::Parameter(format!("{} expects a decimal number", key)))
}

/// Outcome of reading one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without LF and trailing CR.
    Line,
    /// A line longer than [`MAX_LINE_LENGTH`]; its content was discarded.
    TooLong,
    /// Input ended after a partial line.
    Unterminated,
    /// Input ended cleanly.
    Eof,
}

/// Reads LF-terminated lines with a length limit.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Wrap a buffered reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next line into `line`, replacing its content.
    pub async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<LineRead, ProtocolError> {
        line.clear();
        let mut overflow = false;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(if line.is_empty() && !overflow {
                    LineRead::Eof
                } else {
                    line.zeroize();
                    LineRead::Unterminated
                });
            }

            let newline = available.iter().position(|b| *b == b'\n');
            let chunk = match newline {
                Some(pos) => &available[..pos],
                None => available,
            };

            if !overflow {
                if line.len() + chunk.len() > MAX_LINE_LENGTH {
                    overflow = true;
                    line.zeroize();
                } else {
                    line.extend_from_slice(chunk);
                }
            }

            let used = newline.map_or(chunk.len(), |pos| pos + 1);
            self.inner.consume(used);

            if newline.is_some() {
                if overflow {
                    return Ok(LineRead::TooLong);
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(LineRead::Line);
            }
        }
    }
}

/// Writes protocol responses.
///
/// Every status line is flushed immediately since the caller waits for it.
#[derive(Debug)]
pub struct ResponseWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Send the greeting that opens a conversation.
    pub async fn greeting(&mut self) -> Result<(), ProtocolError> {
        self.ok_with(GREETING).await
    }

    /// Send `OK`.
    pub async fn ok(&mut self) -> Result<(), ProtocolError> {
        self.status(b"OK").await
    }

    /// Send `OK <text>`.
    pub async fn ok_with(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.status(format!("OK {}", text).as_bytes()).await
    }

    /// Send `ERR <code> <description>`.
    pub async fn err(&mut self, code: ErrorCode) -> Result<(), ProtocolError> {
        self.status(format!("ERR {}", code).as_bytes()).await
    }

    /// Send `data` as one or more `D` lines.
    ///
    /// `%`, CR and LF are escaped; everything else is passed to the wrapped
    /// writer as slices of `data`, so this writer makes no copy of its own.
    /// Whether the bytes are copied further depends on `W`; wrap a buffering
    /// writer and the secret lands in its buffer. Lines never exceed
    /// [`MAX_LINE_LENGTH`].
    pub async fn data(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        const PAYLOAD: usize = MAX_LINE_LENGTH - 2;

        let mut rest = data;
        while !rest.is_empty() {
            self.inner.write_all(b"D ").await?;
            let mut used = 0;

            while let Some(&byte) = rest.first() {
                if needs_data_escape(byte) {
                    if used + 3 > PAYLOAD {
                        break;
                    }
                    self.inner.write_all(&data_escape(byte)).await?;
                    used += 3;
                    rest = &rest[1..];
                } else {
                    let run = rest.iter().take_while(|b| !needs_data_escape(**b)).count();
                    let take = run.min(PAYLOAD - used);
                    if take == 0 {
                        break;
                    }
                    self.inner.write_all(&rest[..take]).await?;
                    used += take;
                    rest = &rest[take..];
                }
            }

            self.inner.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Send `END`, closing a run of `D` lines.
    pub async fn end(&mut self) -> Result<(), ProtocolError> {
        self.status(b"END").await
    }

    async fn status(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(line).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_numbers() {
        assert_eq!(ErrorCode::General.code(), 1);
        assert_eq!(ErrorCode::OutOfCore.code(), 2);
        assert_eq!(ErrorCode::UnknownCommand.code(), 103);
        assert_eq!(ErrorCode::Canceled.code(), 111);
        assert_eq!(ErrorCode::InvalidOption.code(), 122);
        assert_eq!(ErrorCode::NotConfirmed.code(), 128);
    }

    #[test]
    fn error_code_display() {
        assert_eq!(ErrorCode::Canceled.to_string(), "111 Canceled");
        assert_eq!(ErrorCode::UnknownCommand.to_string(), "103 Unknown command");
    }

    #[test]
    fn command_error_codes() {
        assert_eq!(CommandError::OutOfMemory.code(), ErrorCode::OutOfCore);
        assert_eq!(
            CommandError::Parameter("x".into()).code(),
            ErrorCode::Parameter
        );
        assert_eq!(CommandError::Failed("x".into()).code(), ErrorCode::General);
        assert_eq!(CommandError::NotConfirmed.code(), ErrorCode::NotConfirmed);
    }

    #[test]
    fn parse_command_with_argument() {
        let command = Command::parse(b"SETDESC Enter%20PIN").unwrap().unwrap();
        assert_eq!(command.kind, CommandKind::SetDesc);
        assert_eq!(command.argument, b"Enter%20PIN");
    }

    #[test]
    fn parse_command_keeps_argument_verbatim() {
        let command = Command::parse(b"SETPROMPT \t  Code:  ").unwrap().unwrap();
        assert_eq!(command.kind, CommandKind::SetPrompt);
        assert_eq!(command.argument, b"Code:  ");
    }

    #[test]
    fn parse_command_without_argument() {
        let command = Command::parse(b"GETPIN").unwrap().unwrap();
        assert_eq!(command.kind, CommandKind::GetPin);
        assert!(command.argument.is_empty());
    }

    #[test]
    fn parse_comments_and_blank_lines() {
        assert_eq!(Command::parse(b"").unwrap(), None);
        assert_eq!(Command::parse(b"# a comment").unwrap(), None);
    }

    #[test]
    fn parse_unknown_and_case_mismatch() {
        assert!(matches!(
            Command::parse(b"BOGUS"),
            Err(CommandError::UnknownCommand)
        ));
        assert!(matches!(
            Command::parse(b"getpin"),
            Err(CommandError::UnknownCommand)
        ));
    }

    #[test]
    fn parse_leading_whitespace_is_syntax_error() {
        assert!(matches!(
            Command::parse(b" GETPIN"),
            Err(CommandError::Syntax(_))
        ));
    }

    #[test]
    fn command_kind_names() {
        for (name, kind) in COMMANDS {
            assert_eq!(kind.name(), *name);
            assert_eq!(CommandKind::lookup(name.as_bytes()), Some(*kind));
        }
        assert_eq!(CommandKind::SetOk.text_field(), Some(TextField::Ok));
        assert_eq!(CommandKind::GetPin.text_field(), None);
    }

    #[test]
    fn option_flags() {
        assert_eq!(SessionOption::parse(b"grab").unwrap(), SessionOption::Grab(true));
        assert_eq!(
            SessionOption::parse(b"no-grab").unwrap(),
            SessionOption::Grab(false)
        );
        assert_eq!(
            SessionOption::parse(b"--no-grab").unwrap(),
            SessionOption::Grab(false)
        );
        assert!(matches!(
            SessionOption::parse(b"grab=1"),
            Err(CommandError::InvalidOption(_))
        ));
    }

    #[test]
    fn option_strings() {
        assert_eq!(
            SessionOption::parse(b"display=:0").unwrap(),
            SessionOption::Display(":0".into())
        );
        assert_eq!(
            SessionOption::parse(b"ttyname /dev/pts/1").unwrap(),
            SessionOption::TtyName("/dev/pts/1".into())
        );
        assert_eq!(
            SessionOption::parse(b"ttytype = xterm-256color ").unwrap(),
            SessionOption::TtyType("xterm-256color".into())
        );
        assert_eq!(
            SessionOption::parse(b"lc-ctype=de_DE.UTF-8").unwrap(),
            SessionOption::LcCtype("de_DE.UTF-8".into())
        );
        assert_eq!(
            SessionOption::parse(b"lc-messages=C").unwrap(),
            SessionOption::LcMessages("C".into())
        );
    }

    #[test]
    fn option_values_are_not_escape_decoded() {
        assert_eq!(
            SessionOption::parse(b"display=%3A0").unwrap(),
            SessionOption::Display("%3A0".into())
        );
    }

    #[test]
    fn option_numbers() {
        assert_eq!(
            SessionOption::parse(b"parent-wid=12345").unwrap(),
            SessionOption::ParentWid(12345)
        );
        assert_eq!(
            SessionOption::parse(b"timeout=30").unwrap(),
            SessionOption::Timeout(30)
        );
        assert_eq!(
            SessionOption::parse(b"debug-wait").unwrap(),
            SessionOption::DebugWait(Duration::from_secs(DEFAULT_DEBUG_WAIT))
        );
        assert_eq!(
            SessionOption::parse(b"debug-wait=0").unwrap(),
            SessionOption::DebugWait(Duration::ZERO)
        );
    }

    #[test]
    fn option_bad_numbers_are_parameter_errors() {
        for line in [
            &b"parent-wid=abc"[..],
            b"parent-wid",
            b"timeout=-1",
            b"debug-wait=soon",
        ] {
            assert!(
                matches!(SessionOption::parse(line), Err(CommandError::Parameter(_))),
                "{:?}",
                String::from_utf8_lossy(line)
            );
        }
    }

    #[test]
    fn option_syntax_errors() {
        assert!(matches!(
            SessionOption::parse(b""),
            Err(CommandError::Syntax(_))
        ));
        assert!(matches!(
            SessionOption::parse(b"=foo"),
            Err(CommandError::Syntax(_))
        ));
        assert!(matches!(
            SessionOption::parse(b"display="),
            Err(CommandError::Syntax(_))
        ));
        assert!(matches!(
            SessionOption::parse(b"-grab"),
            Err(CommandError::Syntax(_))
        ));
    }

    #[test]
    fn option_unknown_key() {
        match SessionOption::parse(b"frobnicate=yes") {
            Err(CommandError::InvalidOption(key)) => assert_eq!(key, "frobnicate"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn option_keys() {
        assert_eq!(SessionOption::Grab(false).key(), "no-grab");
        assert_eq!(SessionOption::ParentWid(1).key(), "parent-wid");
    }

    async fn read_all(input: &[u8]) -> Vec<(LineRead, Vec<u8>)> {
        let mut reader = LineReader::new(input);
        let mut results = Vec::new();
        let mut line = Vec::new();
        loop {
            let outcome = reader.read_line(&mut line).await.unwrap();
            results.push((outcome, line.clone()));
            if matches!(outcome, LineRead::Eof | LineRead::Unterminated) {
                return results;
            }
        }
    }

    #[tokio::test]
    async fn reads_lines_and_strips_cr() {
        let results = read_all(b"NOP\nGETPIN\r\n").await;
        assert_eq!(
            results,
            vec![
                (LineRead::Line, b"NOP".to_vec()),
                (LineRead::Line, b"GETPIN".to_vec()),
                (LineRead::Eof, Vec::new()),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_last_line() {
        let results = read_all(b"NOP\nGETP").await;
        assert_eq!(results[1].0, LineRead::Unterminated);
    }

    #[tokio::test]
    async fn overlong_line_is_discarded() {
        let mut input = vec![b'A'; MAX_LINE_LENGTH + 1];
        input.extend_from_slice(b"\nNOP\n");
        let results = read_all(&input).await;
        assert_eq!(results[0].0, LineRead::TooLong);
        assert_eq!(results[1], (LineRead::Line, b"NOP".to_vec()));
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut input = vec![b'A'; MAX_LINE_LENGTH];
        input.push(b'\n');
        let results = read_all(&input).await;
        assert_eq!(results[0].0, LineRead::Line);
        assert_eq!(results[0].1.len(), MAX_LINE_LENGTH);
    }

    fn output(writer: ResponseWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn status_lines() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer.greeting().await.unwrap();
        writer.ok().await.unwrap();
        writer.ok_with("ready").await.unwrap();
        writer.err(ErrorCode::NotConfirmed).await.unwrap();
        writer.end().await.unwrap();
        assert_eq!(
            output(writer),
            "OK Pleased to meet you\nOK\nOK ready\nERR 128 Not confirmed\nEND\n"
        );
    }

    #[tokio::test]
    async fn data_escapes_framing_bytes_only() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer.data(b"a%b\r\nc d+").await.unwrap();
        assert_eq!(output(writer), "D a%25b%0D%0Ac d+\n");
    }

    #[tokio::test]
    async fn empty_data_writes_nothing() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer.data(b"").await.unwrap();
        assert_eq!(output(writer), "");
    }

    #[tokio::test]
    async fn long_data_is_split() {
        let mut writer = ResponseWriter::new(Vec::new());
        writer.data(&[b'a'; 1500]).await.unwrap();
        let output = output(writer);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
        assert_eq!(lines[1], format!("D {}", "a".repeat(502)));
    }

    #[tokio::test]
    async fn escape_is_never_split_across_lines() {
        let mut data = vec![b'a'; MAX_LINE_LENGTH - 3];
        data.push(b'%');

        let mut writer = ResponseWriter::new(Vec::new());
        writer.data(&data).await.unwrap();
        let output = output(writer);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH - 1);
        assert_eq!(lines[1], "D %25");
    }
}
